//! Error types and handling.

use thiserror::Error;

use crate::config::ConfigError;
use crate::protocol::DecodeError;
use crate::sign::SignError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Cloud API rejected the credentials or token (server message verbatim)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Request signing failed (missing or unparseable key material)
    #[error("Signing error: {0}")]
    Signing(#[from] SignError),

    /// Socket-level failure (bind, permission, send)
    #[error("Transport error: {0}")]
    Transport(String),

    /// No valid state reply within the retry budget
    #[error("No state reply after {attempts} attempts")]
    PollTimeout { attempts: u32 },

    /// Malformed wire data
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Device record from the cloud API could not be used
    #[error("Invalid device record: {0}")]
    InvalidDevice(String),

    /// No device with the given MAC address
    #[error("Unknown device: {0}")]
    UnknownDevice(String),
}

/// Result type alias for AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Create an authentication error with message
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a transport error with message
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an invalid device error with message
    pub fn invalid_device(msg: impl Into<String>) -> Self {
        Self::InvalidDevice(msg.into())
    }

    /// Whether the failure only means the device did not answer usefully,
    /// as opposed to a local fault such as a socket that cannot bind.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PollTimeout { .. } | Self::Decode(_))
    }
}
