// Telnet module - Telnet session adapter
pub mod codec;
pub mod server;

pub use codec::{TelnetDecoder, TelnetEncoder, NEGOTIATION};
pub use server::TelnetServer;
