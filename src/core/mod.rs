// Core module - the bridge between one device and its sessions
pub mod bridge;
pub mod discipline;
pub mod hub;
pub mod registry;
pub mod session;
pub mod supervisor;
