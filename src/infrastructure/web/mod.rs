// Web module - browser terminal over websockets
pub mod protocol;
pub mod server;
pub mod session;

pub use server::{WebOptions, WebServer};
pub use session::{TitleInfo, WebTerminalSession};
