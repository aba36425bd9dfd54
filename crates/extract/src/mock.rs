//! Deterministic decoder for testing.

use crate::decoder::Decoder;
use crate::error::{ErrorKind, Result};
use crate::quality::Quality;
use image::{Rgba, RgbaImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// In-memory [`Decoder`] for testing.
///
/// Produces a solid-colour image (the colour is derived from the path, so
/// different sources are distinguishable) at a fixed native resolution,
/// downsampled to the requested maximum dimension. Counts every call, can
/// simulate slow decodes, and can be told to fail for particular paths.
///
/// # Examples
///
/// ```
/// use loupe_extract::error::ErrorKind;
/// use loupe_extract::{Decoder, MockDecoder, Quality};
/// use std::path::Path;
///
/// let decoder = MockDecoder::new().with_failure("/photos/broken.arw", ErrorKind::DecodeFailure("/photos/broken.arw".into()));
/// let image = decoder.decode(Path::new("/photos/ok.arw"), 100, Quality::default()).unwrap();
/// assert_eq!(image.width(), 100);
/// assert!(decoder.decode(Path::new("/photos/broken.arw"), 100, Quality::default()).is_err());
/// assert_eq!(decoder.calls(), 2);
/// ```
pub struct MockDecoder {
    native: (u32, u32),
    delay: Duration,
    failures: Mutex<HashMap<PathBuf, ErrorKind>>,
    calls: AtomicUsize,
}

impl MockDecoder {
    pub fn new() -> Self {
        Self {
            native: (600, 400),
            delay: Duration::ZERO,
            failures: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Native resolution of every source.
    pub fn with_native_size(mut self, width: u32, height: u32) -> Self {
        self.native = (width, height);
        self
    }

    /// Blocks every decode for `delay`, to widen race windows in tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_failure(self, path: impl Into<PathBuf>, kind: ErrorKind) -> Self {
        self.fail(path, kind);
        self
    }

    pub fn fail(&self, path: impl Into<PathBuf>, kind: ErrorKind) {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).insert(path.into(), kind);
    }

    /// Number of times [`decode`](Decoder::decode) has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn colour(path: &Path) -> Rgba<u8> {
        let seed = path.as_os_str().as_encoded_bytes().iter().fold(0u32, |acc, b| acc.wrapping_mul(31) ^ u32::from(*b));
        let [r, g, b, _] = seed.to_le_bytes();
        Rgba([r, g, b, 255])
    }
}

impl Default for MockDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MockDecoder {
    fn decode(&self, path: &Path, max_dimension: u32, _quality: Quality) -> Result<RgbaImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Some(kind) = self.failures.lock().unwrap_or_else(PoisonError::into_inner).get(path) {
            exn::bail!(kind.clone());
        }
        let (width, height) = self.native;
        let long_edge = width.max(height);
        let (width, height) = match max_dimension {
            0 => (width, height),
            max if max >= long_edge => (width, height),
            max => (
                (u64::from(width) * u64::from(max) / u64::from(long_edge)).max(1) as u32,
                (u64::from(height) * u64::from(max) / u64::from(long_edge)).max(1) as u32,
            ),
        };
        Ok(RgbaImage::from_pixel(width, height, Self::colour(path)))
    }
}
