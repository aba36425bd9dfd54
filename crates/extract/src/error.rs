//! Extraction Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An extraction error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The source could not be opened or is not a recognisable image.
    #[display("invalid source image: {}", _0.display())]
    InvalidSource(#[error(not(source))] PathBuf),
    /// The source was recognised but no pixels could be produced from it.
    #[display("failed to decode: {}", _0.display())]
    DecodeFailure(#[error(not(source))] PathBuf),
    /// A RAW container holds no usable embedded JPEG preview.
    #[display("no embedded preview in: {}", _0.display())]
    NoEmbeddedPreview(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // The file is either decodable or it isn't.
        false
    }

    /// Whether the failure is about the source itself rather than the pixels.
    pub fn is_invalid_source(&self) -> bool {
        matches!(self, Self::InvalidSource(_))
    }
}
