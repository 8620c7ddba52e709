//! Error types for the answer stream.

use thiserror::Error;

/// Crate error type.
///
/// Only failures that end a turn are represented here. Malformed records and
/// unparseable final payloads are recovered where they occur and never reach
/// the caller as an `Err`.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request to the upstream failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status.
    #[error("Upstream error ({status}): {message}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Response body, if readable.
        message: String,
    },

    /// The transport failed or closed while the stream was being read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Result type alias for answer stream operations.
pub type Result<T> = std::result::Result<T, Error>;
