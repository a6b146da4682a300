//! Error types for the shaping pipeline.

use thiserror::Error;

/// Result type alias for shaper operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running shapers.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (bad hex, wrong table size, out-of-range field)
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid wire format
    #[error("invalid message format: {0}")]
    InvalidMessage(String),

    /// Buffer shorter than a declared or required length
    #[error("buffer error: expected {expected} bytes, got {actual}")]
    Buffer { expected: usize, actual: usize },

    /// Cipher operation failed
    #[error("cipher error: {0}")]
    Cipher(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new invalid-message error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidMessage(msg.into())
    }

    /// Check if this error indicates a malformed datagram (as opposed to
    /// a misconfigured shaper). Malformed datagrams are dropped by the
    /// composite pipeline; configuration errors are surfaced.
    pub fn is_data_error(&self) -> bool {
        matches!(self, Error::InvalidMessage(_) | Error::Buffer { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Buffer {
            expected: 36,
            actual: 4,
        };
        assert_eq!(err.to_string(), "buffer error: expected 36 bytes, got 4");

        let err = Error::config("frequency table must have 256 entries");
        assert_eq!(
            err.to_string(),
            "configuration error: frequency table must have 256 entries"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::invalid("short fragment").is_data_error());
        assert!(!Error::config("bad key").is_data_error());
    }
}
