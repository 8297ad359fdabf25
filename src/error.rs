// src/error.rs

//! Unified error handling for the monitor.

use std::fmt;

use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed before a response was received
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// The API answered with an unexpected status
    #[error("Transport error for {url}: status {status}")]
    Transport { url: String, status: u16 },

    /// A persisted record could not be decoded
    #[error("Corrupt record at {key}: {message}")]
    CorruptRecord { key: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Board discovery failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Monitor lifecycle error
    #[error("Monitor error: {0}")]
    Monitor(String),
}

impl AppError {
    /// Create a transport error for a non-success status.
    pub fn transport(url: impl Into<String>, status: u16) -> Self {
        Self::Transport {
            url: url.into(),
            status,
        }
    }

    /// Create a corrupt record error.
    pub fn corrupt(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::CorruptRecord {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a discovery error.
    pub fn discovery(message: impl fmt::Display) -> Self {
        Self::Discovery(message.to_string())
    }

    /// Create a monitor lifecycle error.
    pub fn monitor(message: impl Into<String>) -> Self {
        Self::Monitor(message.into())
    }

    /// Whether this error came from an unreadable persisted record.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptRecord { .. })
    }
}
