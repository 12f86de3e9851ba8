use thiserror::Error;

/// SerBridge unified error type
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Session closed")]
    SessionClosed,

    #[error("Bridge cancelled")]
    Cancelled,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl BridgeError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True for errors that end a single session but leave the bridge running.
    pub fn is_session_local(&self) -> bool {
        matches!(self, Self::SessionClosed | Self::Io(_) | Self::Protocol(_))
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
