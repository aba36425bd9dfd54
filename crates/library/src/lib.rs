//! Thumbnail resolution for photo culling.
//!
//! Ties the memory cache, disk cache and decoder together:
//! - [`resolve`] answers single requests through the memory, disk and
//!   extraction tiers, sharing concurrent extractions of the same source.
//! - [`batch`] warms the caches (or exports previews) for a whole directory
//!   with bounded concurrency and a time-remaining estimate.
//! - [`pressure`] listens for host memory pressure and shrinks the memory
//!   cache accordingly.
//! - [`ThumbnailService`] owns one of each and is what applications use.

pub mod batch;
pub mod error;
pub mod pressure;
pub mod resolve;
mod service;

pub use crate::service::{ServiceStatistics, ThumbnailService};

use std::num::NonZeroUsize;

/// Number of files a batch works on at once: twice the available parallelism.
pub fn worker_count() -> usize {
    std::thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1).saturating_mul(2)
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::resolve::Resolver;
    use loupe_cache::{CacheConfig, MemoryCache};
    use loupe_extract::{Decoder, MockDecoder, Quality};
    use loupe_storage::DiskCache;
    use std::sync::Arc;
    use tempfile::TempDir;

    pub(crate) struct Fixture {
        pub(crate) dir: TempDir,
        pub(crate) decoder: Arc<MockDecoder>,
        pub(crate) resolver: Resolver,
    }

    pub(crate) fn fixture(decoder: MockDecoder) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let decoder = Arc::new(decoder);
        let memory = Arc::new(MemoryCache::new(CacheConfig::production()));
        let disk = DiskCache::new(dir.path().join("cache")).unwrap();
        let resolver = Resolver::new(memory, disk, Arc::clone(&decoder) as Arc<dyn Decoder>, Quality::default());
        Fixture { dir, decoder, resolver }
    }

    /// Create empty files named `names` inside `dir`; the mock decoder never reads them.
    pub(crate) fn touch(dir: &std::path::Path, names: &[&str]) -> Vec<std::path::PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                std::fs::write(&path, b"").unwrap();
                path
            })
            .collect()
    }
}
