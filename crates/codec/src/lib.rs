//! Thumbnail pixel buffers and their on-disk encodings.
//!
//! Every tier of the cache works with a single canonical representation,
//! [`Thumbnail`]: an 8-bit RGBA (sRGB) buffer with a non-zero pixel area.
//! This crate provides:
//!
//! - **Format detection** from file extensions ([`Format::from_path`]) or
//!   magic bytes ([`Format::from_magic_bytes`])
//! - **Encoding** to JPEG (lossy, with a quality factor) or PNG ([`Format::encode`])
//! - **Decoding** of stored bytes back into a [`Thumbnail`] ([`decode`])

mod construct;
pub mod error;
mod ops;
mod util;

pub use crate::ops::decode;
pub use image::RgbaImage;

use crate::error::{Error, ErrorKind, Result};
use image::DynamicImage;
use std::fmt::{Debug, Formatter, Result as FmtResult};

/// A supported thumbnail encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Format {
    /// JPEG (.jpg, .jpeg)
    #[default]
    Jpeg,
    /// PNG (.png)
    Png,
}

/// A decoded thumbnail in the canonical in-memory layout (8-bit RGBA).
///
/// Construction rejects zero-area buffers, so `width() * height()` is always
/// at least one pixel.
#[derive(Clone, PartialEq, Eq)]
pub struct Thumbnail {
    image: RgbaImage,
}
impl Thumbnail {
    pub fn new(image: RgbaImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            exn::bail!(ErrorKind::Empty(width, height));
        }
        Ok(Self { image })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Size of the raw pixel buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.image.as_raw().len()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}
impl TryFrom<RgbaImage> for Thumbnail {
    type Error = Error;
    fn try_from(image: RgbaImage) -> Result<Self> {
        Self::new(image)
    }
}
impl TryFrom<DynamicImage> for Thumbnail {
    type Error = Error;
    fn try_from(image: DynamicImage) -> Result<Self> {
        // No-op when the source is already RGBA8.
        Self::new(image.into_rgba8())
    }
}
impl Debug for Thumbnail {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Thumbnail").field("width", &self.width()).field("height", &self.height()).finish()
    }
}
