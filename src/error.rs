//! Error types for chandata-mirror.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while fetching, inflating, or installing a channel document.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (directory creation, file write, rename).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network/HTTP error (connect, timeout, non-2xx status).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The upstream origin responded with a non-2xx status code.
    #[error("upstream returned status {status} for {url}")]
    BadStatus {
        /// HTTP status code returned by the origin.
        status: u16,
        /// URL that was requested.
        url: String,
    },

    /// Gzip inflate of the downloaded document failed.
    #[error("failed to inflate channel document: {0}")]
    Inflate(std::io::Error),

    /// Configuration file could not be parsed.
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable description of the parse failure.
        message: String,
    },
}
