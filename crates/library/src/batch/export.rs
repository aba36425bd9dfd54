use crate::batch::error::{ErrorKind, Result};
use exn::ResultExt;
use loupe_codec::{Format, Thumbnail};
use loupe_extract::extract_preview;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// JPEG quality of exported previews.
pub const PREVIEW_JPEG_QUALITY: u8 = 100;

/// Where the preview for `source` is written: a `.jpg` sibling with the same stem.
pub fn preview_path(source: &Path) -> PathBuf {
    source.with_extension(&Format::Jpeg.extension()[1..])
}

/// Extract the embedded preview of `source` and write it next to it.
///
/// Blocking; run it on a blocking thread.
#[instrument(fields(destination))]
pub fn export_preview(source: &Path, full_size: bool) -> Result<PathBuf> {
    let destination = preview_path(source);
    if destination == source {
        exn::bail!(ErrorKind::WouldOverwrite(destination));
    }
    tracing::Span::current().record("destination", tracing::field::display(destination.display()));

    let image = extract_preview(source, full_size).or_raise(|| ErrorKind::Extract)?;
    let thumbnail = Thumbnail::new(image).or_raise(|| ErrorKind::Encode)?;
    let bytes = Format::Jpeg.encode(&thumbnail, PREVIEW_JPEG_QUALITY).or_raise(|| ErrorKind::Encode)?;
    std::fs::write(&destination, bytes).or_raise(|| ErrorKind::Write(destination.clone()))?;
    tracing::debug!(width = thumbnail.width(), height = thumbnail.height(), "Exported preview");
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageEncoder, RgbImage};
    use rstest::rstest;

    /// A minimal little-endian TIFF header followed by an embedded JPEG.
    fn fake_raw(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = b"II*\0\x08\0\0\0\0\0".to_vec();
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90)
            .write_image(RgbImage::new(width, height).as_raw(), width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        bytes.extend(jpeg);
        bytes
    }

    #[rstest]
    #[case("/photos/DSC_0001.ARW", "/photos/DSC_0001.jpg")]
    #[case("/photos/holiday.nef", "/photos/holiday.jpg")]
    #[case("relative/img.dng", "relative/img.jpg")]
    fn test_preview_path(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(preview_path(Path::new(source)), PathBuf::from(expected));
    }

    #[test]
    fn test_refuses_to_overwrite_source() {
        let err = export_preview(Path::new("/photos/already.jpg"), false).unwrap_err();
        assert!(matches!(&*err, ErrorKind::WouldOverwrite(_)));
    }

    #[test]
    fn test_exports_sibling_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("frame.arw");
        std::fs::write(&source, fake_raw(64, 48)).unwrap();

        let destination = export_preview(&source, false).unwrap();
        assert_eq!(destination, dir.path().join("frame.jpg"));

        let exported = image::open(&destination).unwrap();
        assert_eq!((exported.width(), exported.height()), (64, 48));
    }

    #[test]
    fn test_missing_embedded_preview_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("empty.arw");
        std::fs::write(&source, b"II*\0\x08\0\0\0\0\0").unwrap();

        let err = export_preview(&source, false).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Extract));
        assert!(!dir.path().join("empty.jpg").exists());
    }
}
