//! Error types surfaced by buffers.

use thiserror::Error;

/// Errors surfaced to buffer consumers.
///
/// Integrity and usage errors carry stable, user-visible messages.
/// Transport failures from underlying readers and writers pass through
/// verbatim as [`Error::Storage`]. Errors are cheaply cloneable so that
/// both halves of a cloned buffer can observe the same terminal outcome.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The object held a different number of bytes than its digest declares.
    #[error("Buffer is {actual} bytes in size, while {expected} bytes were expected")]
    SizeMismatch { expected: u64, actual: u64 },

    /// The object's contents did not hash to the digest's checksum.
    #[error("Buffer has checksum {actual}, while {expected} was expected")]
    HashMismatch { expected: String, actual: String },

    /// Action Cache contents failed to parse as a typed message.
    #[error("Failed to unmarshal message: {0}")]
    UnmarshalFailure(String),

    /// A typed message could not be serialized to its wire form.
    #[error("Failed to marshal message: {0}")]
    MarshalFailure(String),

    /// The object exceeds the size the caller is willing to materialize.
    #[error("Buffer is {size} bytes in size, while a maximum of {maximum} bytes is permitted")]
    MaximumSizeExceeded { size: u64, maximum: u64 },

    #[error("Negative read offset: {0}")]
    NegativeReadOffset(i64),

    /// A positioned read was requested past the end of the object.
    #[error("Buffer is {size} bytes in size, while a read at offset {offset} was requested")]
    ReadOffsetOutOfBounds { size: u64, offset: i64 },

    #[error("Invalid chunk policy: minimum {minimum}, maximum {maximum}")]
    InvalidChunkPolicy { minimum: usize, maximum: usize },

    /// Opaque failure of an underlying reader, writer, or backend.
    #[error("{0}")]
    Storage(String),
}

impl Error {
    /// Wrap this error for transport across an `io::Read`/`AsyncRead`
    /// boundary. The typed error is preserved and can be recovered with
    /// [`Error::from_io_error`].
    pub fn into_io_error(self) -> std::io::Error {
        std::io::Error::other(self)
    }

    /// Recover a typed error previously wrapped by [`Error::into_io_error`].
    /// Foreign I/O errors become opaque [`Error::Storage`] values.
    pub fn from_io_error(err: std::io::Error) -> Error {
        match err.downcast::<Error>() {
            Ok(err) => err,
            Err(err) => Error::Storage(err.to_string()),
        }
    }
}

/// Result type alias for buffer operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_messages() {
        assert_eq!(
            Error::SizeMismatch {
                expected: 11,
                actual: 5
            }
            .to_string(),
            "Buffer is 5 bytes in size, while 11 bytes were expected"
        );
        assert_eq!(
            Error::MaximumSizeExceeded {
                size: 11,
                maximum: 10
            }
            .to_string(),
            "Buffer is 11 bytes in size, while a maximum of 10 bytes is permitted"
        );
        assert_eq!(
            Error::NegativeReadOffset(-5).to_string(),
            "Negative read offset: -5"
        );
        assert_eq!(
            Error::ReadOffsetOutOfBounds {
                size: 11,
                offset: 12
            }
            .to_string(),
            "Buffer is 11 bytes in size, while a read at offset 12 was requested"
        );
        assert_eq!(
            Error::Storage("Connection closed".to_string()).to_string(),
            "Connection closed"
        );
    }

    #[test]
    fn test_io_error_roundtrip() {
        let err = Error::HashMismatch {
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert_eq!(Error::from_io_error(err.clone().into_io_error()), err);

        let foreign = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        assert_eq!(
            Error::from_io_error(foreign),
            Error::Storage("pipe closed".to_string())
        );
    }
}
