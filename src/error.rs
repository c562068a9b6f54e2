//! Error types for distkv

use thiserror::Error;
use std::io;

/// Result type alias for distkv operations
pub type Result<T> = std::result::Result<T, DistKvError>;

/// Custom error types for distkv
///
/// The `Display` text of `KeyNotFound` and `InvalidOperation` is what travels
/// in the `error` field of a FAILURE response, so clients can map it back.
#[derive(Error, Debug)]
pub enum DistKvError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol decode error: {0}")]
    Protocol(String),

    #[error("Protocol encode error: {0}")]
    Encode(String),

    #[error("this key does not exist")]
    KeyNotFound,

    #[error("invalid operation")]
    InvalidOperation,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Replication error: {0}")]
    Replication(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for DistKvError {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        DistKvError::Protocol(format!("Parse error: {:?}", err))
    }
}
