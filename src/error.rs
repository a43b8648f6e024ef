//! Error handling for the joulecoin node
//!
//! A single crate-wide error type covering ledger, protocol, and
//! configuration failures. Protocol-level errors are answered on the wire
//! and never tear down the process.

use thiserror::Error;

/// Result type alias for joulecoin operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the joulecoin node
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Ledger state errors
    #[error("Ledger error: {message}")]
    Ledger { message: String },

    /// Stratum protocol errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Submission on a session that has not authorized
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Cost function / hashing errors
    #[error("Cryptographic error: {message}")]
    Crypto { message: String },

    /// Cancellation of a long-running operation
    #[error("Operation was cancelled: {operation}")]
    Cancelled { operation: String },

    /// Invalid state errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a ledger error
    pub fn ledger(message: impl Into<String>) -> Self {
        Self::Ledger {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an authorization error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Config { .. } => "config",
            Error::Ledger { .. } => "ledger",
            Error::Protocol { .. } => "protocol",
            Error::Unauthorized { .. } => "unauthorized",
            Error::Crypto { .. } => "crypto",
            Error::Cancelled { .. } => "cancelled",
            Error::InvalidState { .. } => "invalid_state",
        }
    }
}
