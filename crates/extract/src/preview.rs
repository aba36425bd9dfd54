//! Embedded JPEG previews inside camera RAW containers.
//!
//! RAW files (TIFF-based ones like ARW, NEF and DNG in particular) carry one
//! or more camera-rendered JPEGs: a tiny thumbnail, a medium preview and often
//! a full-resolution one. Rather than parsing every vendor's IFD layout, scan
//! the container for JPEG start-of-image markers and keep the candidate whose
//! header reports the largest frame.

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, RgbaImage};
use memchr::memmem;
use std::io::Cursor;
use std::path::Path;
use tracing::instrument;

/// Long-edge limit for exported previews.
pub const PREVIEW_DIMENSION: u32 = 4320;
/// Long-edge limit for exported previews when full size is requested.
pub const FULL_SIZE_PREVIEW_DIMENSION: u32 = 8640;

/// SOI marker followed by the first byte of the next marker.
const JPEG_SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];
/// Header parsing is cheap but not free; containers don't hold more than a
/// handful of real previews.
const MAX_CANDIDATES: usize = 32;
const TIFF_ORIENTATION_TAG: u16 = 0x0112;

/// An embedded JPEG stream found inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedJpeg {
    pub offset: usize,
    pub width: u32,
    pub height: u32,
}

impl EmbeddedJpeg {
    fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Every embedded JPEG in `bytes` whose header parses, in file order.
pub fn find_embedded_jpegs(bytes: &[u8]) -> Vec<EmbeddedJpeg> {
    memmem::find_iter(bytes, &JPEG_SOI)
        .take(MAX_CANDIDATES)
        .filter_map(|offset| {
            let reader = ImageReader::with_format(Cursor::new(&bytes[offset..]), ImageFormat::Jpeg);
            let (width, height) = reader.into_dimensions().ok()?;
            (width > 0 && height > 0).then_some(EmbeddedJpeg { offset, width, height })
        })
        .collect()
}

/// The embedded JPEG with the largest pixel area.
pub(crate) fn largest_embedded_jpeg(bytes: &[u8]) -> Option<EmbeddedJpeg> {
    find_embedded_jpegs(bytes).into_iter().max_by_key(EmbeddedJpeg::area)
}

/// Orientation from the first IFD of a TIFF-based container, if any.
pub(crate) fn container_orientation(bytes: &[u8]) -> Option<Orientation> {
    let big_endian = match bytes.get(..4)? {
        [b'I', b'I', 0x2A, 0x00] => false,
        [b'M', b'M', 0x00, 0x2A] => true,
        _ => return None,
    };
    let read_u16 = |at: usize| -> Option<u16> {
        let raw: [u8; 2] = bytes.get(at..at + 2)?.try_into().ok()?;
        Some(if big_endian { u16::from_be_bytes(raw) } else { u16::from_le_bytes(raw) })
    };
    let read_u32 = |at: usize| -> Option<u32> {
        let raw: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
        Some(if big_endian { u32::from_be_bytes(raw) } else { u32::from_le_bytes(raw) })
    };
    let ifd = usize::try_from(read_u32(4)?).ok()?;
    let entries = usize::from(read_u16(ifd)?);
    (0..entries).find_map(|index| {
        let entry = ifd + 2 + index * 12;
        if read_u16(entry)? != TIFF_ORIENTATION_TAG {
            return None;
        }
        // SHORT value, stored left-justified in the 4-byte value field.
        let value = u8::try_from(read_u16(entry + 8)?).ok()?;
        Orientation::from_exif(value)
    })
}

/// Decodes the largest embedded JPEG in a RAW container, honouring the
/// container's (or failing that, the JPEG's own) orientation.
#[instrument(level = "debug", skip(path, bytes), fields(path = %path.display(), width, height))]
pub(crate) fn decode_embedded(path: &Path, bytes: &[u8]) -> Result<DynamicImage> {
    let candidate = largest_embedded_jpeg(bytes).ok_or_raise(|| ErrorKind::NoEmbeddedPreview(path.to_path_buf()))?;
    let span = tracing::Span::current();
    span.record("width", candidate.width);
    span.record("height", candidate.height);
    let reader = ImageReader::with_format(Cursor::new(&bytes[candidate.offset..]), ImageFormat::Jpeg);
    let mut decoder = reader.into_decoder().or_raise(|| ErrorKind::DecodeFailure(path.to_path_buf()))?;
    let embedded_orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let orientation = container_orientation(bytes).unwrap_or(embedded_orientation);
    let mut image = DynamicImage::from_decoder(decoder).or_raise(|| ErrorKind::DecodeFailure(path.to_path_buf()))?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Largest embedded preview of a RAW file, downsampled only when its long
/// edge exceeds [`PREVIEW_DIMENSION`] (or [`FULL_SIZE_PREVIEW_DIMENSION`]).
#[instrument(skip(path), fields(path = %path.display()))]
pub fn extract_preview(path: &Path, full_size: bool) -> Result<RgbaImage> {
    let bytes = std::fs::read(path).or_raise(|| ErrorKind::InvalidSource(path.to_path_buf()))?;
    let image = decode_embedded(path, &bytes)?;
    let limit = match full_size {
        true => FULL_SIZE_PREVIEW_DIMENSION,
        false => PREVIEW_DIMENSION,
    };
    Ok(fit_within(image, limit, FilterType::Lanczos3).into_rgba8())
}

/// Scales `image` down so its long edge is at most `max_dimension`, keeping
/// the aspect ratio. Never upscales; zero means "no limit".
pub(crate) fn fit_within(image: DynamicImage, max_dimension: u32, filter: FilterType) -> DynamicImage {
    if max_dimension == 0 || image.width().max(image.height()) <= max_dimension {
        return image;
    }
    image.resize(max_dimension, max_dimension, filter)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::{ExtendedColorType, Rgb, RgbImage};

    pub(crate) fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, _| Rgb([(x % 256) as u8, 64, 192]));
        let mut output = Vec::new();
        JpegEncoder::new_with_quality(&mut output, 90)
            .encode(image.as_raw(), width, height, ExtendedColorType::Rgb8)
            .unwrap();
        output
    }

    /// A little-endian TIFF header with a single IFD holding an orientation
    /// tag, followed by two embedded JPEGs.
    pub(crate) fn fake_raw(orientation: Option<u16>) -> Vec<u8> {
        let mut bytes = vec![b'I', b'I', 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        match orientation {
            Some(value) => {
                bytes.extend_from_slice(&1u16.to_le_bytes());
                bytes.extend_from_slice(&TIFF_ORIENTATION_TAG.to_le_bytes());
                bytes.extend_from_slice(&3u16.to_le_bytes());
                bytes.extend_from_slice(&1u32.to_le_bytes());
                bytes.extend_from_slice(&value.to_le_bytes());
                bytes.extend_from_slice(&[0, 0]);
            },
            None => bytes.extend_from_slice(&0u16.to_le_bytes()),
        }
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 64]);
        bytes.extend(jpeg(16, 12));
        bytes.extend_from_slice(&[0u8; 64]);
        bytes.extend(jpeg(64, 48));
        bytes.extend_from_slice(&[0u8; 16]);
        bytes
    }

    #[test]
    fn test_find_embedded_jpegs() {
        let found = find_embedded_jpegs(&fake_raw(None));
        let dimensions: Vec<_> = found.iter().map(|j| (j.width, j.height)).collect();
        assert!(dimensions.contains(&(16, 12)));
        assert!(dimensions.contains(&(64, 48)));
        assert_eq!(largest_embedded_jpeg(&fake_raw(None)).map(|j| (j.width, j.height)), Some((64, 48)));
    }

    #[test]
    fn test_no_embedded_jpeg() {
        assert!(find_embedded_jpegs(b"II*\0 nothing to see here").is_empty());
        let err = decode_embedded(Path::new("/x.arw"), b"II*\0").unwrap_err();
        assert!(matches!(&*err, ErrorKind::NoEmbeddedPreview(_)));
    }

    #[test]
    fn test_container_orientation() {
        assert_eq!(container_orientation(&fake_raw(Some(6))), Some(Orientation::Rotate90));
        assert_eq!(container_orientation(&fake_raw(Some(1))), Some(Orientation::NoTransforms));
        assert_eq!(container_orientation(&fake_raw(None)), None);
        assert_eq!(container_orientation(b"not a tiff"), None);
        assert_eq!(container_orientation(b"II"), None);
    }

    #[test]
    fn test_decode_embedded_applies_orientation() {
        let upright = decode_embedded(Path::new("/x.arw"), &fake_raw(None)).unwrap();
        assert_eq!((upright.width(), upright.height()), (64, 48));
        let rotated = decode_embedded(Path::new("/x.arw"), &fake_raw(Some(6))).unwrap();
        assert_eq!((rotated.width(), rotated.height()), (48, 64));
    }

    #[test]
    fn test_fit_within_never_upscales() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(100, 50));
        let same = fit_within(image.clone(), 400, FilterType::Triangle);
        assert_eq!((same.width(), same.height()), (100, 50));
        let smaller = fit_within(image.clone(), 40, FilterType::Triangle);
        assert_eq!((smaller.width(), smaller.height()), (40, 20));
        let unlimited = fit_within(image, 0, FilterType::Triangle);
        assert_eq!((unlimited.width(), unlimited.height()), (100, 50));
    }

    #[test]
    fn test_extract_preview_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("DSC0001.ARW");
        std::fs::write(&path, fake_raw(None)).unwrap();
        let preview = extract_preview(&path, false).unwrap();
        assert_eq!(preview.dimensions(), (64, 48));
        let err = extract_preview(&temp_dir.path().join("missing.arw"), true).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidSource(_)));
    }
}
