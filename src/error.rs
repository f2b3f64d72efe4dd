//! Crate-wide error type.
//!
//! Every fallible operation in the engine returns [`Result<T>`]. The variants
//! mirror the handful of failure classes the on-disk format and cache layers
//! can produce; each carries a human-readable message.
//!
//! The enum is `Clone + PartialEq` (all payloads are strings) because
//! iterator status is *sticky*: once an iterator observes an error it keeps
//! returning the same value from `status()` for the rest of its life, so the
//! error must be cheap to duplicate.

use thiserror::Error;

/// Errors produced by the table engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The requested key or file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// On-disk data failed validation: bad magic, truncated block,
    /// checksum mismatch, or an undecodable structure.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A requested feature is not available in this build.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The caller supplied an argument the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(String),
}

/// A `Result` with the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
