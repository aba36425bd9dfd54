use crate::Format;
use crate::error::{Error, ErrorKind};
use std::{path::Path, str::FromStr};

const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];
const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

impl FromStr for Format {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Format::Jpeg),
            "png" => Ok(Format::Png),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}
impl Format {
    /// Detect the encoding from a file extension.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref().extension().and_then(|ext| ext.to_str()).and_then(|ext| ext.parse().ok())
    }

    /// Detect the encoding from magic bytes.
    ///
    /// Returns `None` if no signature matches or the input is too short to
    /// detect any format.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&JPEG_MAGIC) {
            return Some(Format::Jpeg);
        }
        if bytes.starts_with(&PNG_MAGIC) {
            return Some(Format::Png);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use crate::Format;
    use rstest::rstest;

    #[rstest]
    #[case("jpg", Format::Jpeg)]
    #[case("JPEG", Format::Jpeg)]
    #[case("png", Format::Png)]
    fn test_from_str(#[case] test: &str, #[case] expected: Format) {
        assert_eq!(test.parse::<Format>().unwrap(), expected);
    }

    #[rstest]
    #[case("webp")]
    #[case("arw")]
    #[case(" ")]
    fn test_from_str_invalid(#[case] test: &str) {
        assert!(test.parse::<Format>().is_err());
    }

    #[rstest]
    #[case("cache/0af3.jpg", Some(Format::Jpeg))]
    #[case("DSC01234.JPG", Some(Format::Jpeg))]
    #[case("preview.png", Some(Format::Png))]
    #[case("DSC01234.ARW", None)]
    // A dotfile has no extension.
    #[case(".jpg", None)]
    #[case("no-extension", None)]
    fn test_from_path(#[case] test: &str, #[case] expected: Option<Format>) {
        assert_eq!(Format::from_path(test), expected);
    }

    #[rstest]
    #[case(&[0xFF, 0xD8, 0xFF, 0xE0], Some(Format::Jpeg))]
    #[case(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00], Some(Format::Png))]
    #[case(&[0xFF, 0xD8], None)]
    #[case(b"II*\0", None)]
    #[case(&[], None)]
    fn test_from_magic_bytes(#[case] bytes: &[u8], #[case] expected: Option<Format>) {
        assert_eq!(Format::from_magic_bytes(bytes), expected);
    }
}
