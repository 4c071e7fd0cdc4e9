//! Error types for the somacast broadcast node

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for somacast operations
#[derive(Error, Debug)]
pub enum CastError {
    /// Outbound delivery failed
    #[error("Transport error: {message} (peer: {peer})")]
    Transport { message: String, peer: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Join handle errors
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CastError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>, peer: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            peer: peer.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Error codes carried by `error` reply bodies.
///
/// The numbering follows the Maelstrom protocol so that standard clients
/// can classify failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum ErrorCode {
    Timeout,
    NodeNotFound,
    NotSupported,
    TemporarilyUnavailable,
    MalformedRequest,
    Crash,
    Abort,
    PreconditionFailed,
}

impl ErrorCode {
    /// Numeric wire value
    pub fn code(self) -> u32 {
        match self {
            Self::Timeout => 0,
            Self::NodeNotFound => 1,
            Self::NotSupported => 10,
            Self::TemporarilyUnavailable => 11,
            Self::MalformedRequest => 12,
            Self::Crash => 13,
            Self::Abort => 14,
            Self::PreconditionFailed => 22,
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl TryFrom<u32> for ErrorCode {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Timeout,
            1 => Self::NodeNotFound,
            10 => Self::NotSupported,
            11 => Self::TemporarilyUnavailable,
            12 => Self::MalformedRequest,
            13 => Self::Crash,
            14 => Self::Abort,
            22 => Self::PreconditionFailed,
            other => return Err(format!("unknown error code {}", other)),
        })
    }
}
