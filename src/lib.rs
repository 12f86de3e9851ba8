//! SerBridge Library
//!
//! Serial-port-to-network gateway: one bridge per serial device, shared by
//! any number of Telnet, web-terminal and stdio sessions, with transparent
//! reconnection when the device disappears and comes back.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use core::bridge::{Bridge, BridgeSettings};
pub use core::hub::{BroadcastHub, LinkStatus};
pub use core::session::{ByteStream, Session, SessionId};
pub use domain::config::BridgeConfig;
pub use domain::error::{BridgeError, BridgeResult};
