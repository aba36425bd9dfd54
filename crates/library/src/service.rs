use crate::batch::{BatchEvent, BatchPipeline};
use crate::error::{ErrorKind, Result};
use crate::pressure::{PressureMonitor, PressureSource, PressureStatistics};
use crate::resolve::{Resolved, Resolver, ResolverStatistics};
use exn::ResultExt;
use futures::Stream;
use loupe_cache::{CacheStatistics, MemoryCache};
use loupe_config::{Settings, ThumbnailUse};
use loupe_extract::{Decoder, NativeDecoder};
use loupe_storage::{DiskCache, ThumbnailKey};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceStatistics {
    pub cache: CacheStatistics,
    pub resolver: ResolverStatistics,
    pub pressure: PressureStatistics,
}

/// Everything an application needs to show thumbnails: both cache tiers, the
/// resolver, a batch pipeline and a memory pressure monitor, configured from
/// one [`Settings`].
///
/// Instances are independent of each other; nothing is global.
pub struct ThumbnailService {
    settings: RwLock<Settings>,
    resolver: Resolver,
    batch: BatchPipeline,
    pressure: PressureMonitor,
}

impl ThumbnailService {
    /// A service decoding sources with the [`NativeDecoder`].
    ///
    /// # Errors
    ///
    /// If the settings do not describe a usable cache, or if the disk cache
    /// directory cannot be created.
    pub fn new(settings: Settings) -> Result<Self> {
        Self::with_decoder(settings, Arc::new(NativeDecoder))
    }

    pub fn with_decoder(settings: Settings, decoder: Arc<dyn Decoder>) -> Result<Self> {
        settings.validate();
        let config = settings.cache_config().or_raise(|| ErrorKind::Config)?;
        let cache_root = settings.cache_root().or_raise(|| ErrorKind::Config)?;
        let disk = DiskCache::new(&cache_root).or_raise(|| ErrorKind::Storage)?;
        let memory = Arc::new(MemoryCache::new(config));
        let resolver = Resolver::new(Arc::clone(&memory), disk, decoder, settings.quality());
        let batch = BatchPipeline::new(resolver.clone(), settings.extensions.clone());
        let pressure = PressureMonitor::new(memory);
        tracing::debug!(cache_root = %cache_root.display(), "Thumbnail service ready");
        Ok(Self { settings: RwLock::new(settings), resolver, batch, pressure })
    }

    /// Attach an observer to the pressure monitor. Only valid before monitoring starts.
    pub fn with_pressure_observer(mut self, observer: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.pressure = PressureMonitor::new(Arc::clone(self.resolver.memory())).with_observer(observer);
        self
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Reconfigure the running service. The disk cache location is fixed at
    /// construction and is not affected.
    pub fn apply_settings(&self, settings: Settings) -> Result<()> {
        settings.validate();
        let config = settings.cache_config().or_raise(|| ErrorKind::Config)?;
        self.resolver.memory().configure(config);
        self.resolver.set_quality(settings.quality());
        self.batch.set_extensions(settings.extensions.clone());
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
        Ok(())
    }

    /// Long-edge size requested for `usage`.
    pub fn target_size(&self, usage: ThumbnailUse) -> u32 {
        let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);
        match usage {
            ThumbnailUse::Preview if settings.use_thumbnail_as_zoom_preview => settings.sizes.grid,
            usage => settings.sizes.for_use(usage),
        }
    }

    pub async fn resolve(&self, path: &Path, target_size: u32) -> Result<Resolved> {
        let key = ThumbnailKey::new(path).or_raise(|| ErrorKind::Resolve)?;
        self.resolver.resolve(&key, target_size).await.or_raise(|| ErrorKind::Resolve)
    }

    /// The thumbnail for `path`, or `None` if none can be produced.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn thumbnail(&self, path: &Path, usage: ThumbnailUse) -> Option<Resolved> {
        match self.resolve(path, self.target_size(usage)).await {
            Ok(resolved) => Some(resolved),
            Err(e) => {
                tracing::warn!(error = ?e, "No thumbnail available");
                None
            },
        }
    }

    pub fn batch(&self) -> &BatchPipeline {
        &self.batch
    }

    /// Warm both cache tiers for `directory`, returning how many files succeeded.
    pub async fn warm(&self, directory: &Path, usage: ThumbnailUse) -> Result<u64> {
        self.batch.run(directory, self.target_size(usage)).await
    }

    pub fn warm_events<'a>(
        &'a self,
        directory: &'a Path,
        usage: ThumbnailUse,
    ) -> impl Stream<Item = Result<BatchEvent>> + 'a {
        self.batch.warm(directory, self.target_size(usage))
    }

    pub async fn export_previews(&self, directory: &Path, full_size: bool) -> Result<u64> {
        self.batch.run_export(directory, full_size).await
    }

    pub fn export_events<'a>(
        &'a self,
        directory: &'a Path,
        full_size: bool,
    ) -> impl Stream<Item = Result<BatchEvent>> + 'a {
        self.batch.export(directory, full_size)
    }

    pub fn cancel_batch(&self) {
        self.batch.cancel();
    }

    pub fn start_pressure_monitoring(&self, source: &dyn PressureSource) -> bool {
        self.pressure.start(source)
    }

    pub async fn stop_pressure_monitoring(&self) {
        self.pressure.stop().await;
    }

    pub fn statistics(&self) -> ServiceStatistics {
        ServiceStatistics {
            cache: self.resolver.memory().statistics(),
            resolver: self.resolver.statistics(),
            pressure: self.pressure.statistics(),
        }
    }

    pub fn reset_statistics(&self) {
        self.resolver.memory().reset_statistics();
    }

    /// Bytes used by the disk cache.
    pub async fn disk_cache_size(&self) -> u64 {
        self.resolver.flush().await;
        self.resolver.disk().size_bytes().await
    }

    /// Remove disk cache entries older than the configured maximum age.
    pub async fn prune_disk_cache(&self) -> u64 {
        let max_age_days = self.settings.read().unwrap_or_else(PoisonError::into_inner).disk_cache_max_age_days;
        self.prune_disk_cache_older_than(max_age_days).await
    }

    /// Remove disk cache entries older than `max_age_days`; zero removes everything.
    pub async fn prune_disk_cache_older_than(&self, max_age_days: u32) -> u64 {
        self.resolver.flush().await;
        self.resolver.disk().prune(max_age_days).await
    }

    /// Empty both tiers and reset the cache statistics. Returns the number of
    /// disk files removed.
    pub async fn clear_caches(&self) -> u64 {
        self.resolver.flush().await;
        self.resolver.memory().clear();
        self.resolver.disk().clear().await
    }

    /// Cancel any batch, stop pressure monitoring, and wait for pending disk
    /// writes.
    pub async fn shutdown(&self) {
        self.batch.cancel();
        self.pressure.stop().await;
        self.resolver.flush().await;
        tracing::debug!("Thumbnail service shut down");
    }
}
