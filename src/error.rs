//! Error types for the APNG codec.

use std::io;
use thiserror::Error;

/// Result type for APNG operations.
pub type Result<T> = std::result::Result<T, ApngError>;

/// Errors that can occur while decoding or encoding an APNG stream.
#[derive(Error, Debug)]
pub enum ApngError {
    /// The stream violates PNG/APNG syntax or an invariant of the format.
    #[error("invalid APNG stream: {0}")]
    Format(String),

    /// The stream is syntactically valid but uses something this codec
    /// does not support.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Underlying source or sink failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<ApngError> for io::Error {
    fn from(err: ApngError) -> Self {
        match err {
            ApngError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ApngError::Format("bad signature".to_string());
        assert!(err.to_string().contains("bad signature"));

        let err = ApngError::Unsupported("dimension overflow".to_string());
        assert!(err.to_string().contains("dimension overflow"));
    }

    #[test]
    fn test_io_conversion() {
        let err = ApngError::Format("truncated chunk".to_string());
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
    }
}
