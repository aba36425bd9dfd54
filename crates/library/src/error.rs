//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A single thumbnail could not be produced.
    #[display("could not resolve thumbnail")]
    Resolve,
    /// The source directory of a batch could not be listed.
    #[display("could not list source files in {}", _0.display())]
    Discovery(#[error(not(source))] PathBuf),
    /// One item of a batch failed; the batch carries on.
    #[display("batch item failed: {}", _0.display())]
    Item(#[error(not(source))] PathBuf),
    /// Settings could not be turned into a working configuration.
    #[display("invalid configuration")]
    Config,
    /// The disk cache directory could not be opened.
    #[display("disk cache unavailable")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Discovery(_) | Self::Storage)
    }
}
