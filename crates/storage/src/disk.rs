//! Content-addressed disk cache.
//!
//! Thumbnails are stored as JPEG files under `<cache-root>/Thumbnails/`, named
//! by the digest of their [`ThumbnailKey`]. The disk tier is an accelerator,
//! never a source of truth: the infallible methods (`load`, `save`,
//! `size_bytes`, `prune`) log failures and carry on. The `try_*` variants
//! return the underlying error for callers that care.

use crate::ThumbnailKey;
use crate::discover::is_hidden;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use loupe_codec::{Format, Thumbnail};
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::{Duration, UtcDateTime};
use tokio::fs;
use tracing::instrument;

/// Name of the directory created inside the cache root.
pub const THUMBNAIL_DIRECTORY: &str = "Thumbnails";
/// JPEG quality factor for stored thumbnails (0.7).
pub const DISK_JPEG_QUALITY: u8 = 70;

#[derive(Clone, Debug)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    /// Open (creating if necessary) the thumbnail directory inside `cache_root`.
    ///
    /// # Errors
    ///
    /// Returns an error if `cache_root` is not absolute, or if the thumbnail
    /// directory cannot be created.
    pub fn new(cache_root: impl AsRef<Path>) -> Result<Self> {
        let cache_root = cache_root.as_ref();
        if !cache_root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(cache_root.to_path_buf()));
        }
        let root = cache_root.join(THUMBNAIL_DIRECTORY);
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Use non-async here; it only happens once on service construction
            // and it's not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| ErrorKind::from_io(e, &root))?;
        }
        Ok(Self { root })
    }

    /// Directory holding the cached files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic cache key (hex digest) for a source identity.
    pub fn cache_key(key: &ThumbnailKey) -> String {
        key.digest()
    }

    /// Full path of the cache file for `key`.
    pub fn file_path(&self, key: &ThumbnailKey) -> PathBuf {
        self.root.join(format!("{}{}", Self::cache_key(key), Format::Jpeg.extension()))
    }

    /// Read the stored encoding for `key`. Any failure is a miss.
    pub async fn load(&self, key: &ThumbnailKey) -> Option<Vec<u8>> {
        match self.try_load(key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(source = %key, error = ?e, "Could not read disk cache entry; treating as a miss");
                None
            },
        }
    }

    #[instrument(level = "trace", skip(self), fields(source = %key, found))]
    pub async fn try_load(&self, key: &ThumbnailKey) -> Result<Option<Vec<u8>>> {
        let path = self.file_path(key);
        let result = match fs::read(&path).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => exn::bail!(ErrorKind::from_io(e, &path)),
        };
        tracing::Span::current().record("found", result.is_some());
        Ok(result)
    }

    /// Encode and store `thumbnail` for `key`, replacing any previous entry.
    /// Failures are logged and swallowed.
    pub async fn save(&self, thumbnail: Arc<Thumbnail>, key: &ThumbnailKey) {
        if let Err(e) = self.try_save(thumbnail, key).await {
            tracing::warn!(source = %key, error = ?e, "Could not write disk cache entry");
        }
    }

    #[instrument(level = "debug", skip(self, thumbnail), fields(source = %key, bytes))]
    pub async fn try_save(&self, thumbnail: Arc<Thumbnail>, key: &ThumbnailKey) -> Result<()> {
        // JPEG encoding is CPU-bound; keep it off the async workers.
        let bytes = tokio::task::spawn_blocking(move || Format::Jpeg.encode(&thumbnail, DISK_JPEG_QUALITY))
            .await
            .or_raise(|| ErrorKind::Worker)?
            .or_raise(|| ErrorKind::Encode)?;
        tracing::Span::current().record("bytes", bytes.len());
        let path = self.file_path(key);
        fs::create_dir_all(&self.root).await.map_err(|e| ErrorKind::from_io(e, &self.root))?;
        fs::write(&path, &bytes).await.map_err(|e| ErrorKind::from_io(e, &path))?;
        Ok(())
    }

    /// Total allocated size of the non-hidden files in the cache directory.
    pub async fn size_bytes(&self) -> u64 {
        match self.try_size_bytes().await {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!(path = %self.root.display(), error = ?e, "Could not measure disk cache");
                0
            },
        }
    }

    pub async fn try_size_bytes(&self) -> Result<u64> {
        let mut total = 0;
        for (_, metadata) in self.entries().await? {
            total += allocated_size(&metadata);
        }
        Ok(total)
    }

    /// Delete every cached file last modified more than `max_age_days` ago.
    /// Zero deletes everything. Returns the number of files removed.
    #[instrument(skip(self), fields(path = %self.root.display(), removed))]
    pub async fn prune(&self, max_age_days: u32) -> u64 {
        // Ages reaching back before the earliest representable date keep everything.
        let Some(cutoff) = UtcDateTime::now().checked_sub(Duration::days(i64::from(max_age_days))) else {
            tracing::debug!(max_age_days, "Cutoff out of range; nothing to prune");
            return 0;
        };
        let entries = match self.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = ?e, "Could not list disk cache for pruning");
                return 0;
            },
        };
        let mut removed = 0;
        for (path, metadata) in entries {
            if max_age_days > 0 {
                match metadata.modified() {
                    Ok(modified) if UtcDateTime::from(modified) >= cutoff => continue,
                    Ok(_) => {},
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "No modification time; skipping");
                        continue;
                    },
                }
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                // Someone else got there first.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not delete cached file"),
            }
        }
        tracing::Span::current().record("removed", removed);
        tracing::info!(removed, max_age_days, "Pruned disk cache");
        removed
    }

    /// Remove every cached file.
    pub async fn clear(&self) -> u64 {
        self.prune(0).await
    }

    /// Regular, non-hidden files directly inside the cache directory.
    async fn entries(&self) -> Result<Vec<(PathBuf, Metadata)>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => exn::bail!(ErrorKind::from_io(e, &self.root)),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| ErrorKind::from_io(e, &self.root))? {
            let path = entry.path();
            if is_hidden(&path) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable cache entry");
                    continue;
                },
            };
            if metadata.is_file() {
                files.push((path, metadata));
            }
        }
        Ok(files)
    }
}

#[cfg(unix)]
fn allocated_size(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    // st_blocks is always in 512-byte units, regardless of the filesystem block size.
    metadata.blocks() * 512
}

#[cfg(not(unix))]
fn allocated_size(metadata: &Metadata) -> u64 {
    metadata.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::time::{Duration as StdDuration, SystemTime};

    fn thumbnail() -> Arc<Thumbnail> {
        let image = RgbaImage::from_fn(40, 30, |x, y| Rgba([x as u8, y as u8, 200, 255]));
        Arc::new(Thumbnail::new(image).unwrap())
    }

    fn key(name: &str) -> ThumbnailKey {
        ThumbnailKey::new(format!("/photos/{name}")).unwrap()
    }

    fn count_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    fn age(path: &Path, days: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - StdDuration::from_secs(days * 24 * 60 * 60)).unwrap();
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(temp_dir.path()).unwrap();
        assert_eq!(cache.root(), temp_dir.path().join(THUMBNAIL_DIRECTORY));
        assert!(cache.root().is_dir());
        assert!(DiskCache::new("relative/cache").is_err());
    }

    #[test]
    fn test_file_path_is_content_addressed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(temp_dir.path()).unwrap();
        let path = cache.file_path(&key("DSC0001.ARW"));
        assert_eq!(path.parent().unwrap(), cache.root());
        assert_eq!(path.extension().unwrap(), "jpg");
        assert_eq!(path, cache.file_path(&ThumbnailKey::new("/photos/./DSC0001.ARW").unwrap()));
        assert_ne!(path, cache.file_path(&key("DSC0002.ARW")));
    }

    #[tokio::test]
    async fn test_load_missing_is_a_miss() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(temp_dir.path()).unwrap();
        assert!(cache.load(&key("missing.arw")).await.is_none());
        assert!(cache.try_load(&key("missing.arw")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(temp_dir.path()).unwrap();
        cache.try_save(thumbnail(), &key("a.arw")).await.unwrap();
        let bytes = cache.load(&key("a.arw")).await.unwrap();
        assert!(Format::Jpeg.check_magic_bytes(&bytes));
        assert_eq!(loupe_codec::decode(&bytes).unwrap().dimensions(), (40, 30));
        // Re-saving overwrites in place.
        cache.try_save(thumbnail(), &key("a.arw")).await.unwrap();
        assert_eq!(count_files(cache.root()), 1);
    }

    #[tokio::test]
    async fn test_save_failure_is_swallowed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(temp_dir.path()).unwrap();
        // Occupy the target filename with a directory so the write fails.
        std::fs::create_dir(cache.file_path(&key("a.arw"))).unwrap();
        assert!(cache.try_save(thumbnail(), &key("a.arw")).await.is_err());
        cache.save(thumbnail(), &key("a.arw")).await;
    }

    #[tokio::test]
    async fn test_prune_zero_removes_everything() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(temp_dir.path()).unwrap();
        for name in ["a.arw", "b.arw", "c.arw"] {
            cache.try_save(thumbnail(), &key(name)).await.unwrap();
        }
        assert_eq!(count_files(cache.root()), 3);
        assert_eq!(cache.prune(0).await, 3);
        assert_eq!(count_files(cache.root()), 0);
    }

    #[tokio::test]
    async fn test_prune_respects_age() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(temp_dir.path()).unwrap();
        cache.try_save(thumbnail(), &key("old.arw")).await.unwrap();
        cache.try_save(thumbnail(), &key("new.arw")).await.unwrap();
        age(&cache.file_path(&key("old.arw")), 45);
        age(&cache.file_path(&key("new.arw")), 2);
        assert_eq!(cache.prune(30).await, 1);
        assert!(cache.load(&key("old.arw")).await.is_none());
        assert!(cache.load(&key("new.arw")).await.is_some());
    }

    #[tokio::test]
    async fn test_prune_beyond_calendar_keeps_everything() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(temp_dir.path()).unwrap();
        cache.try_save(thumbnail(), &key("old.arw")).await.unwrap();
        age(&cache.file_path(&key("old.arw")), 3650);
        assert_eq!(cache.prune(u32::MAX).await, 0);
        assert_eq!(count_files(cache.root()), 1);
    }

    #[tokio::test]
    async fn test_size_skips_hidden_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(temp_dir.path()).unwrap();
        assert_eq!(cache.size_bytes().await, 0);
        std::fs::write(cache.root().join(".DS_Store"), vec![0u8; 64 * 1024]).unwrap();
        assert_eq!(cache.size_bytes().await, 0);
        cache.try_save(thumbnail(), &key("a.arw")).await.unwrap();
        let size = cache.size_bytes().await;
        assert!(size > 0);
        assert!(size < 64 * 1024);
        // Hidden files also survive a clear.
        cache.clear().await;
        assert_eq!(count_files(cache.root()), 1);
    }
}
