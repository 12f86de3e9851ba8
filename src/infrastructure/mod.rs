// Infrastructure module - External dependencies and adapters
pub mod config;
pub mod logging;
pub mod serial;
pub mod stdio;
pub mod telnet;
pub mod web;
