//! Resolution Error Types
//!
//! Outcomes of a coalesced extraction are handed to every waiter, so these
//! kinds are `Clone`. The full error tree is logged once, by the extraction
//! itself.

use derive_more::{Display, Error};
use loupe_extract::error::ErrorKind as ExtractErrorKind;
use std::path::{Path, PathBuf};

/// A resolution error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for resolution.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The decoder could not open the source.
    #[display("invalid source: {}", _0.display())]
    InvalidSource(#[error(not(source))] PathBuf),
    /// The decoder could not produce pixels.
    #[display("decode failure: {}", _0.display())]
    DecodeFailure(#[error(not(source))] PathBuf),
    /// Decoded pixels could not be turned into a thumbnail.
    #[display("render failure: {}", _0.display())]
    RenderFailure(#[error(not(source))] PathBuf),
    /// Disk tier read or write failed. Always recovered locally.
    #[display("disk cache I/O failure")]
    DiskIo,
    /// The extraction was abandoned before it produced a result.
    #[display("cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DiskIo | Self::Cancelled)
    }

    pub(crate) fn from_extract(kind: &ExtractErrorKind, path: &Path) -> Self {
        match kind {
            ExtractErrorKind::InvalidSource(_) => Self::InvalidSource(path.to_path_buf()),
            ExtractErrorKind::DecodeFailure(_) | ExtractErrorKind::NoEmbeddedPreview(_) => {
                Self::DecodeFailure(path.to_path_buf())
            },
        }
    }
}
