//! # Error Types
//!
//! Custom error types for the sensor spooler using `thiserror`.

use thiserror::Error;

/// Main error type for the sensor spooler
#[derive(Debug, Error)]
pub enum SpoolerError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Serial device errors (open failures, driver errors)
    #[error("Serial error: {0}")]
    Serial(String),

    /// HTTP transport errors (connection refused, DNS, timeout)
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// A file name or date that could not be turned into a timestamp
    #[error("Timestamp error: {0}")]
    Timestamp(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the sensor spooler
pub type Result<T> = std::result::Result<T, SpoolerError>;
