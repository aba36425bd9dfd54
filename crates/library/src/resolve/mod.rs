//! Tiered thumbnail resolution.
//!
//! A request for a thumbnail is answered by the first tier that has it:
//!
//! 1. The in-memory cache.
//! 2. The disk cache. A hit is decoded off the async runtime and promoted
//!    into memory. Undecodable bytes are ignored and treated as a miss.
//! 3. An extraction from the source file. Concurrent requests for the same
//!    key share a single extraction; the first requester starts it, everyone
//!    else awaits the same outcome.
//!
//! Extractions run as their own tasks. A requester going away never cancels
//! work other requesters (or the caches) are waiting on.

pub mod error;

use crate::resolve::error::{Error, ErrorKind, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use loupe_cache::{AccessGuard, MemoryCache};
use loupe_codec::Thumbnail;
use loupe_extract::{Decoder, Quality};
use loupe_storage::{DiskCache, ThumbnailKey};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::task::TaskTracker;
use tracing::instrument;

type Extraction = Shared<BoxFuture<'static, std::result::Result<Arc<Thumbnail>, ErrorKind>>>;
type InFlight = Arc<Mutex<HashMap<ThumbnailKey, Extraction>>>;

/// Which tier answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Memory,
    Disk,
    /// This request started the extraction.
    Extracted,
    /// This request joined an extraction another request started.
    Coalesced,
}

/// A resolved thumbnail.
///
/// While a `Resolved` is alive the memory cache will not evict the entry it
/// came from (if it is still resident).
pub struct Resolved {
    thumbnail: Arc<Thumbnail>,
    origin: Origin,
    _access: Option<AccessGuard>,
}

impl Resolved {
    fn new(thumbnail: Arc<Thumbnail>, origin: Origin, access: Option<AccessGuard>) -> Self {
        Self { thumbnail, origin, _access: access }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn thumbnail(&self) -> Arc<Thumbnail> {
        Arc::clone(&self.thumbnail)
    }
}

impl Deref for Resolved {
    type Target = Thumbnail;

    fn deref(&self) -> &Self::Target {
        &self.thumbnail
    }
}

impl Debug for Resolved {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("origin", &self.origin)
            .field("dimensions", &self.thumbnail.dimensions())
            .field("pinned", &self._access.is_some())
            .finish()
    }
}

/// Counters owned by the resolver rather than the memory cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStatistics {
    /// Number of times the decoder was invoked.
    pub decodes: u64,
    /// Requests that joined an extraction already in flight.
    pub coalesced: u64,
    /// Extractions currently in flight.
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    decodes: AtomicU64,
    coalesced: AtomicU64,
}

struct Tiers {
    memory: Arc<MemoryCache>,
    disk: DiskCache,
    decoder: Arc<dyn Decoder>,
    quality: AtomicU8,
    in_flight: InFlight,
    writes: TaskTracker,
    counters: Counters,
}

/// Removes an extraction from the in-flight table however its task ends.
struct InFlightGuard {
    table: InFlight,
    key: ThumbnailKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.key);
    }
}

#[derive(Clone)]
pub struct Resolver {
    tiers: Arc<Tiers>,
}

impl Resolver {
    pub fn new(memory: Arc<MemoryCache>, disk: DiskCache, decoder: Arc<dyn Decoder>, quality: Quality) -> Self {
        Self {
            tiers: Arc::new(Tiers {
                memory,
                disk,
                decoder,
                quality: AtomicU8::new(quality.level()),
                in_flight: InFlight::default(),
                writes: TaskTracker::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn memory(&self) -> &Arc<MemoryCache> {
        &self.tiers.memory
    }

    pub fn disk(&self) -> &DiskCache {
        &self.tiers.disk
    }

    pub fn quality(&self) -> Quality {
        Quality::new(self.tiers.quality.load(Ordering::Relaxed))
    }

    /// Applies to extractions started from now on.
    pub fn set_quality(&self, quality: Quality) {
        self.tiers.quality.store(quality.level(), Ordering::Relaxed);
    }

    pub fn statistics(&self) -> ResolverStatistics {
        ResolverStatistics {
            decodes: self.tiers.counters.decodes.load(Ordering::Relaxed),
            coalesced: self.tiers.counters.coalesced.load(Ordering::Relaxed),
            in_flight: self.tiers.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len(),
        }
    }

    /// Resolve the thumbnail for `key`, no larger than `target_size` on its
    /// long edge (zero meaning native size).
    ///
    /// # Errors
    ///
    /// Fails only when the thumbnail has to be extracted and the extraction
    /// fails. Disk tier problems are logged and treated as misses.
    #[instrument(skip(self), fields(source = %key))]
    pub async fn resolve(&self, key: &ThumbnailKey, target_size: u32) -> Result<Resolved> {
        let memory = &self.tiers.memory;
        if let Some(access) = memory.get(key) {
            memory.record_hit();
            tracing::trace!("Memory cache hit");
            return Ok(Resolved::new(access.thumbnail(), Origin::Memory, Some(access)));
        }
        memory.record_miss();

        if let Some(thumbnail) = self.load_from_disk(key).await {
            memory.record_disk_hit();
            memory.insert(key.clone(), Arc::clone(&thumbnail));
            tracing::trace!("Disk cache hit");
            return Ok(Resolved::new(thumbnail, Origin::Disk, memory.get(key)));
        }

        self.extract(key, target_size).await
    }

    async fn load_from_disk(&self, key: &ThumbnailKey) -> Option<Arc<Thumbnail>> {
        let bytes = self.tiers.disk.load(key).await?;
        match decode_stored(bytes).await {
            Ok(thumbnail) => Some(Arc::new(thumbnail)),
            Err(e) => {
                tracing::warn!(source = %key, error = ?e, "Ignoring undecodable disk cache entry");
                None
            },
        }
    }

    async fn extract(&self, key: &ThumbnailKey, target_size: u32) -> Result<Resolved> {
        let (extraction, origin) = {
            let mut table = self.tiers.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match table.get(key) {
                Some(extraction) => {
                    self.tiers.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Joining extraction already in flight");
                    (extraction.clone(), Origin::Coalesced)
                },
                None => {
                    // An extraction may have finished between the memory lookup
                    // and taking the lock. It populates memory before leaving
                    // the table, so checking again here closes the gap.
                    if let Some(access) = self.tiers.memory.get(key) {
                        return Ok(Resolved::new(access.thumbnail(), Origin::Memory, Some(access)));
                    }
                    let extraction = self.start_extraction(key.clone(), target_size);
                    table.insert(key.clone(), extraction.clone());
                    (extraction, Origin::Extracted)
                },
            }
        };
        let thumbnail = extraction.await.map_err(Error::from)?;
        Ok(Resolved::new(thumbnail, origin, self.tiers.memory.get(key)))
    }

    /// Must be called with the in-flight table locked, so the task cannot
    /// remove its own entry before it has been inserted.
    fn start_extraction(&self, key: ThumbnailKey, target_size: u32) -> Extraction {
        let tiers = Arc::clone(&self.tiers);
        let path = key.path().to_path_buf();
        let task = tokio::spawn(run_extraction(tiers, key, target_size));
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => {
                    tracing::error!(source = %path.display(), "Extraction task panicked");
                    Err(ErrorKind::DecodeFailure(path))
                },
                Err(_) => Err(ErrorKind::Cancelled),
            }
        }
        .boxed()
        .shared()
    }

    /// Wait for every pending disk write to finish.
    pub async fn flush(&self) {
        self.tiers.writes.close();
        self.tiers.writes.wait().await;
        self.tiers.writes.reopen();
    }
}

async fn decode_stored(bytes: Vec<u8>) -> Result<Thumbnail> {
    match tokio::task::spawn_blocking(move || loupe_codec::decode(&bytes)).await {
        Ok(Ok(thumbnail)) => Ok(thumbnail),
        Ok(Err(e)) => Err(e.raise(ErrorKind::DiskIo)),
        Err(_) => exn::bail!(ErrorKind::DiskIo),
    }
}

#[instrument(skip(tiers), fields(source = %key))]
async fn run_extraction(
    tiers: Arc<Tiers>,
    key: ThumbnailKey,
    target_size: u32,
) -> std::result::Result<Arc<Thumbnail>, ErrorKind> {
    let _guard = InFlightGuard { table: Arc::clone(&tiers.in_flight), key: key.clone() };
    let path = key.path().to_path_buf();
    let decoder = Arc::clone(&tiers.decoder);
    let quality = Quality::new(tiers.quality.load(Ordering::Relaxed));

    tiers.counters.decodes.fetch_add(1, Ordering::Relaxed);
    let decoded = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || decoder.decode(&path, target_size, quality)).await
    };
    let image = match decoded {
        Ok(Ok(image)) => image,
        Ok(Err(e)) => {
            let kind = ErrorKind::from_extract(&e, &path);
            tracing::warn!(error = ?e, "Extraction failed");
            return Err(kind);
        },
        Err(_) => {
            tracing::error!("Decoder did not run to completion");
            return Err(ErrorKind::DecodeFailure(path));
        },
    };
    let thumbnail = match Thumbnail::new(image) {
        Ok(thumbnail) => Arc::new(thumbnail),
        Err(e) => {
            tracing::warn!(error = ?e, "Decoder produced an unusable image");
            return Err(ErrorKind::RenderFailure(path));
        },
    };

    tiers.memory.insert(key.clone(), Arc::clone(&thumbnail));
    let disk = tiers.disk.clone();
    let stored = Arc::clone(&thumbnail);
    tiers.writes.spawn(async move { disk.save(stored, &key).await });

    tracing::debug!(width = thumbnail.width(), height = thumbnail.height(), "Extracted thumbnail");
    Ok(thumbnail)
}
