//! Wire decoding errors.

use thiserror::Error;

/// Malformed or unrecognized wire data. Always recoverable by dropping the packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the header or declared content length requires.
    #[error("Truncated packet: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// First byte is not the protocol magic.
    #[error("Bad magic byte: {0:#04x}")]
    BadMagic(u8),

    /// A raw field value has no matching enumerated member.
    #[error("Unknown {field} value: {value}")]
    UnknownEnumValue { field: &'static str, value: u16 },
}

/// Result type for protocol decoding.
pub type Result<T> = std::result::Result<T, DecodeError>;
