//! Source image decoding.
//!
//! Turns a source file into a downsampled 8-bit RGBA buffer. Camera RAW
//! containers are never demosaiced: the largest JPEG preview embedded by the
//! camera is used instead, which is what every culling tool displays anyway.
//!
//! The [`Decoder`] trait is the seam between the cache and the pixels. It is
//! synchronous and CPU-bound; async callers are expected to run it on a
//! blocking thread pool.

mod decoder;
pub mod error;
#[cfg(feature = "mock")]
mod mock;
mod preview;
mod quality;

pub use crate::decoder::{Decoder, NativeDecoder, RAW_EXTENSIONS, is_raw};
#[cfg(feature = "mock")]
pub use crate::mock::MockDecoder;
pub use crate::preview::{FULL_SIZE_PREVIEW_DIMENSION, PREVIEW_DIMENSION, extract_preview, find_embedded_jpegs};
pub use crate::quality::Quality;
