//! Encoding Operations

use crate::error::{ErrorKind, Result};
use crate::{Format, Thumbnail};
use exn::{OptionExt, ResultExt};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};
use tracing::instrument;

/// JPEG quality factors outside this range are clamped.
const JPEG_QUALITY_MIN: u8 = 1;
const JPEG_QUALITY_MAX: u8 = 100;

impl Format {
    /// Encode a thumbnail in memory.
    ///
    /// `quality` only applies to JPEG (1 to 100, clamped). JPEG has no alpha
    /// channel, so transparency is flattened away.
    ///
    /// # Examples
    ///
    /// ```
    /// use image::RgbaImage;
    /// use loupe_codec::{Format, Thumbnail};
    ///
    /// let thumbnail = Thumbnail::new(RgbaImage::new(8, 8)).unwrap();
    /// let bytes = Format::Jpeg.encode(&thumbnail, 70).unwrap();
    /// assert!(Format::Jpeg.check_magic_bytes(&bytes));
    /// ```
    pub fn encode(&self, thumbnail: &Thumbnail, quality: u8) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.encode_into(thumbnail, quality, &mut output)?;
        Ok(output)
    }

    #[instrument(skip(thumbnail, output), fields(
        format = %self,
        width = thumbnail.width(),
        height = thumbnail.height(),
        output_size
    ))]
    pub fn encode_into(&self, thumbnail: &Thumbnail, quality: u8, output: &mut Vec<u8>) -> Result<usize> {
        let (width, height) = thumbnail.dimensions();
        match self {
            Format::Jpeg => {
                let quality = quality.clamp(JPEG_QUALITY_MIN, JPEG_QUALITY_MAX);
                let rgb = DynamicImage::ImageRgba8(thumbnail.image().clone()).into_rgb8();
                let mut encoder = JpegEncoder::new_with_quality(&mut *output, quality);
                encoder
                    .encode(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
                    .or_raise(|| ErrorKind::Encoder(self.as_str()))?;
            },
            Format::Png => {
                PngEncoder::new(&mut *output)
                    .write_image(thumbnail.image().as_raw(), width, height, ExtendedColorType::Rgba8)
                    .or_raise(|| ErrorKind::Encoder(self.as_str()))?;
            },
        }
        let size = output.len();
        tracing::Span::current().record("output_size", size);
        Ok(size)
    }
}

/// Decode stored bytes back into a [`Thumbnail`].
///
/// The format is detected from magic bytes; anything that isn't a JPEG or a
/// PNG is rejected as [`UnsupportedFormat`](ErrorKind::UnsupportedFormat).
#[instrument(skip(input), fields(input_size = input.len()))]
pub fn decode(input: &[u8]) -> Result<Thumbnail> {
    let format = Format::from_magic_bytes(input)
        .ok_or_raise(|| ErrorKind::UnsupportedFormat("unrecognised signature".to_string()))?;
    let image = image::load_from_memory_with_format(input, format.into()).or_raise(|| ErrorKind::InvalidData)?;
    Thumbnail::try_from(image).or_raise(|| ErrorKind::InvalidData)
}
