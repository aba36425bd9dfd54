//! Batch Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A batch error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for batch operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("not a usable source path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    #[display("could not produce thumbnail")]
    Resolve,
    #[display("could not extract embedded preview")]
    Extract,
    #[display("could not encode preview")]
    Encode,
    #[display("could not write preview to {}", _0.display())]
    Write(#[error(not(source))] PathBuf),
    #[display("refusing to overwrite source file {}", _0.display())]
    WouldOverwrite(#[error(not(source))] PathBuf),
    #[display("export worker did not run to completion")]
    Worker,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Write(_) | Self::Worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::InvalidPath("/photos".into()), false)]
    #[case(ErrorKind::Resolve, false)]
    #[case(ErrorKind::Extract, false)]
    #[case(ErrorKind::Encode, false)]
    #[case(ErrorKind::Write("/photos/a.jpg".into()), true)]
    #[case(ErrorKind::WouldOverwrite("/photos/a.jpg".into()), false)]
    #[case(ErrorKind::Worker, true)]
    fn test_is_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }
}
