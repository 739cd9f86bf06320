//! Error types for the bankstate library.

use std::io;
use thiserror::Error;

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while ingesting, extracting and encoding statements.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred while reading a document.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error reading a CSV/TSV export.
    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    /// Bad caller input (unknown mode, missing API key, undecodable file type).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The document had no usable content at all.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Unsupported output format or a failure while encoding camt.053.
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// The external extraction provider failed.
    #[error("Integration error: {message}")]
    Integration { message: String, retryable: bool },
}

impl Error {
    /// Build an integration error that the caller may retry (timeouts, 5xx, 429).
    pub fn retryable(message: impl Into<String>) -> Self {
        Error::Integration {
            message: message.into(),
            retryable: true,
        }
    }

    /// Build an integration error that will not succeed on retry.
    pub fn fatal(message: impl Into<String>) -> Self {
        Error::Integration {
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Integration { retryable: true, .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Mapping(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::retryable("timeout").is_retryable());
        assert!(!Error::fatal("HTTP 401").is_retryable());
        assert!(!Error::Extraction("empty".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = Error::Mapping("Unsupported output format: pdf".into());
        assert_eq!(err.to_string(), "Mapping error: Unsupported output format: pdf");
    }
}
