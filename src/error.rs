//! Error types for lgdb.

use std::io;
use thiserror::Error;

/// Result type alias for lgdb operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for repair and storage operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// I/O error from file operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// Data corruption detected.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller supplied an unusable argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// CRC checksum mismatch.
    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// Invalid file format or magic number.
    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    /// Descriptor (manifest) error.
    #[error("Manifest error: {0}")]
    ManifestError(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Error::NotFound(err.to_string())
        } else {
            Error::Io(err.to_string())
        }
    }
}

impl Error {
    /// Create a corruption error with the given message.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    /// Create an invalid format error.
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Error::InvalidFormat(msg.into())
    }

    /// Create a manifest error.
    pub fn manifest<S: Into<String>>(msg: S) -> Self {
        Error::ManifestError(msg.into())
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Check if this error indicates corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Corruption(_) | Error::CrcMismatch { .. } | Error::InvalidFormat(_)
        )
    }

    /// Check if this error indicates a missing resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("bad data");
        assert_eq!(format!("{}", err), "Corruption detected: bad data");

        let err = Error::InvalidArgument("no comparator".into());
        assert_eq!(format!("{}", err), "Invalid argument: no comparator");
    }

    #[test]
    fn test_error_is_corruption() {
        assert!(Error::corruption("bad").is_corruption());
        assert!(Error::CrcMismatch {
            expected: 1,
            actual: 2
        }
        .is_corruption());
        assert!(!Error::NotFound("gone".into()).is_corruption());
    }

    #[test]
    fn test_io_not_found_conversion() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "missing").into();
        assert!(err.is_not_found());

        let err: Error = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
