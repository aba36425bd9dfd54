use crate::error::{ErrorKind, Result};
use crate::preview::{decode_embedded, fit_within};
use crate::quality::Quality;
use exn::{OptionExt, ResultExt};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, RgbaImage};
use std::io::Cursor;
use std::path::Path;
use tracing::instrument;

/// Extensions (lowercase) of RAW containers decoded through their embedded preview.
pub const RAW_EXTENSIONS: &[&str] = &["arw", "cr2", "cr3", "dng", "nef", "orf", "raf", "rw2"];

/// Whether `path` names a camera RAW container.
pub fn is_raw(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| RAW_EXTENSIONS.iter().any(|raw| raw.eq_ignore_ascii_case(ext)))
}

/// Produces thumbnail pixels from a source file.
///
/// Implementations must:
/// - honour the orientation recorded in the source,
/// - return 8-bit RGBA regardless of the source layout, and
/// - never return a buffer larger than the source's native resolution.
///
/// `max_dimension` bounds the long edge of the result; zero means native size.
/// Calls are blocking and may be slow, so async callers should use
/// `tokio::task::spawn_blocking`.
pub trait Decoder: Send + Sync {
    fn decode(&self, path: &Path, max_dimension: u32, quality: Quality) -> Result<RgbaImage>;
}

/// [`Decoder`] backed by the `image` crate.
///
/// RAW containers (see [`RAW_EXTENSIONS`]) are decoded through their largest
/// embedded JPEG; everything else is decoded directly, with the format sniffed
/// from the file contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeDecoder;

impl NativeDecoder {
    fn decode_standard(path: &Path, bytes: &[u8]) -> Result<DynamicImage> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .or_raise(|| ErrorKind::InvalidSource(path.to_path_buf()))?;
        reader.format().ok_or_raise(|| ErrorKind::InvalidSource(path.to_path_buf()))?;
        let mut decoder = reader.into_decoder().or_raise(|| ErrorKind::InvalidSource(path.to_path_buf()))?;
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        let mut image = DynamicImage::from_decoder(decoder).or_raise(|| ErrorKind::DecodeFailure(path.to_path_buf()))?;
        image.apply_orientation(orientation);
        Ok(image)
    }
}

impl Decoder for NativeDecoder {
    #[instrument(skip(self, path, quality), fields(path = %path.display(), quality = %quality, width, height))]
    fn decode(&self, path: &Path, max_dimension: u32, quality: Quality) -> Result<RgbaImage> {
        let bytes = std::fs::read(path).or_raise(|| ErrorKind::InvalidSource(path.to_path_buf()))?;
        let image = match is_raw(path) {
            true => decode_embedded(path, &bytes).or_raise(|| ErrorKind::DecodeFailure(path.to_path_buf()))?,
            false => Self::decode_standard(path, &bytes)?,
        };
        let image = fit_within(image, max_dimension, quality.filter()).into_rgba8();
        let span = tracing::Span::current();
        span.record("width", image.width());
        span.record("height", image.height());
        Ok(image)
    }
}
