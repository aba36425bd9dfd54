//! Command-line Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load settings")]
    Settings,
    #[display("could not start the thumbnail service")]
    Service,
    #[display("batch failed")]
    Batch,
    #[display("no thumbnail available for {}", _0.display())]
    Unavailable(#[error(not(source))] PathBuf),
    #[display("could not write {}", _0.display())]
    Output(#[error(not(source))] PathBuf),
}
