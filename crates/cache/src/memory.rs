//! Cost-bounded memory cache.

use crate::config::CacheConfig;
use crate::entry::{AccessGuard, CacheEntry};
use crate::pressure::MemoryPressureLevel;
use crate::stats::{CacheStatistics, EvictionCounter};
use loupe_codec::Thumbnail;
use loupe_storage::ThumbnailKey;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::instrument;

struct Slot {
    entry: Arc<CacheEntry>,
    /// Logical clock value of the most recent insert or hit.
    last_used: u64,
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    disk_hits: u64,
}

struct Inner {
    entries: HashMap<ThumbnailKey, Slot>,
    /// Keys by `last_used`, oldest first. One stamp per resident entry.
    recency: BTreeMap<u64, ThumbnailKey>,
    configured: CacheConfig,
    pressure: MemoryPressureLevel,
    /// Cost limit currently in force; derived from `configured` and `pressure`.
    cost_limit: u64,
    total_cost: u64,
    clock: u64,
    counters: Counters,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn over_budget(&self, incoming_cost: u64, incoming_count: usize) -> bool {
        self.total_cost.saturating_add(incoming_cost) > self.cost_limit
            || self.entries.len().saturating_add(incoming_count) > self.configured.count_limit
    }

    fn detach(&mut self, key: &ThumbnailKey) -> Option<Arc<CacheEntry>> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.last_used);
        self.total_cost = self.total_cost.saturating_sub(slot.entry.cost());
        Some(slot.entry)
    }

    /// Evicts not-in-use entries, least recently used first, until an insert
    /// of `incoming_cost` (and `incoming_count` items) fits. Returns the number
    /// of entries evicted; stops early if only in-use entries remain.
    fn make_room(&mut self, incoming_cost: u64, incoming_count: usize) -> u64 {
        if !self.over_budget(incoming_cost, incoming_count) {
            return 0;
        }
        let mut evicted = 0;
        let mut cursor = 0;
        while self.over_budget(incoming_cost, incoming_count) {
            let Some((&stamp, key)) = self.recency.range(cursor..).next() else {
                break;
            };
            let key = key.clone();
            cursor = stamp.saturating_add(1);
            let discarded = self.entries.get(&key).is_some_and(|slot| slot.entry.discard_if_possible());
            if discarded {
                self.detach(&key);
                evicted += 1;
                tracing::trace!(source = %key, "Evicted thumbnail from memory");
            }
        }
        evicted
    }

    fn discard_idle(&mut self) -> u64 {
        let before = self.entries.len();
        let total_cost = &mut self.total_cost;
        let recency = &mut self.recency;
        self.entries.retain(|_, slot| {
            let discarded = slot.entry.discard_if_possible();
            if discarded {
                *total_cost = total_cost.saturating_sub(slot.entry.cost());
                recency.remove(&slot.last_used);
            }
            !discarded
        });
        (before - self.entries.len()) as u64
    }
}

/// In-process thumbnail cache bounded by cost and count.
///
/// All mutable state sits behind one lock; payloads are shared read-only with
/// readers through [`AccessGuard`]s. Eviction picks the least recently used
/// entry among those no reader currently holds.
pub struct MemoryCache {
    inner: Mutex<Inner>,
    evictions: EvictionCounter,
}

impl MemoryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                configured: config,
                pressure: MemoryPressureLevel::Normal,
                cost_limit: config.total_cost_limit,
                total_cost: 0,
                clock: 0,
                counters: Counters::default(),
            }),
            evictions: EvictionCounter::default(),
        }
    }

    // Every critical section leaves `Inner` consistent before anything that
    // could panic, so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the budgets. Entries already resident are left alone until the
    /// next insert or pressure event.
    #[instrument(level = "debug", skip(self))]
    pub fn configure(&self, config: CacheConfig) {
        let mut inner = self.lock();
        inner.configured = config;
        inner.cost_limit = inner.pressure.cost_limit(config.total_cost_limit);
    }

    pub fn config(&self) -> CacheConfig {
        self.lock().configured
    }

    /// Shared handle to the eviction counter.
    pub fn eviction_counter(&self) -> EvictionCounter {
        self.evictions.clone()
    }

    /// Returns scoped access to the entry for `key`, or `None` when it is
    /// absent or discarded.
    pub fn get(&self, key: &ThumbnailKey) -> Option<AccessGuard> {
        let mut inner = self.lock();
        let now = inner.tick();
        let Inner { entries, recency, .. } = &mut *inner;
        let slot = entries.get_mut(key)?;
        let guard = AccessGuard::acquire(Arc::clone(&slot.entry))?;
        recency.remove(&std::mem::replace(&mut slot.last_used, now));
        recency.insert(now, key.clone());
        Some(guard)
    }

    pub fn contains(&self, key: &ThumbnailKey) -> bool {
        self.lock().entries.get(key).is_some_and(|slot| !slot.entry.is_discarded())
    }

    /// Inserts `payload` at the configured cost estimate.
    pub fn insert(&self, key: ThumbnailKey, payload: Arc<Thumbnail>) {
        let cost = self.config().cost_of(payload.as_ref());
        self.put(key, payload, cost);
    }

    /// Inserts or replaces the entry for `key`.
    ///
    /// Idle entries are evicted until the new one fits. If only in-use
    /// entries remain the new entry is inserted anyway, so the cache can
    /// briefly exceed its budget by the size of the newest item.
    #[instrument(level = "trace", skip(self, payload), fields(source = %key, evicted))]
    pub fn put(&self, key: ThumbnailKey, payload: Arc<Thumbnail>, cost: u64) {
        let mut inner = self.lock();
        if let Some(previous) = inner.detach(&key) {
            // Readers of the old payload keep it alive through their guard.
            previous.discard_if_possible();
        }
        let evicted = inner.make_room(cost, 1);
        let now = inner.tick();
        inner.recency.insert(now, key.clone());
        inner.entries.insert(key, Slot { entry: Arc::new(CacheEntry::new(payload, cost)), last_used: now });
        inner.total_cost = inner.total_cost.saturating_add(cost);
        drop(inner);
        if evicted > 0 {
            self.evictions.add(evicted);
        }
        tracing::Span::current().record("evicted", evicted);
    }

    /// Drops every entry. Idle entries are discarded; entries still held by a
    /// reader stay valid for that reader but can no longer be looked up.
    #[instrument(level = "debug", skip(self), fields(discarded, detached))]
    pub fn remove_all(&self) {
        let mut inner = self.lock();
        let (mut discarded, mut detached) = (0u64, 0u64);
        inner.recency.clear();
        for (_, slot) in inner.entries.drain() {
            match slot.entry.discard_if_possible() {
                true => discarded += 1,
                false => detached += 1,
            }
        }
        inner.total_cost = 0;
        let span = tracing::Span::current();
        span.record("discarded", discarded);
        span.record("detached", detached);
    }

    /// Adapts the cost limit to host memory pressure.
    ///
    /// - `Normal` restores the configured limit.
    /// - `Warning` keeps 60% of the configured limit and trims to fit.
    /// - `Critical` discards every idle entry and clamps the limit to 50 MiB.
    #[instrument(skip(self), fields(evicted))]
    pub fn apply_pressure(&self, level: MemoryPressureLevel) {
        let mut inner = self.lock();
        inner.pressure = level;
        inner.cost_limit = level.cost_limit(inner.configured.total_cost_limit);
        let evicted = match level {
            MemoryPressureLevel::Normal => 0,
            MemoryPressureLevel::Warning => inner.make_room(0, 0),
            MemoryPressureLevel::Critical => inner.discard_idle(),
        };
        let cost_limit = inner.cost_limit;
        drop(inner);
        if evicted > 0 {
            self.evictions.add(evicted);
        }
        tracing::Span::current().record("evicted", evicted);
        tracing::info!(%level, cost_limit, "Applied memory pressure to thumbnail cache");
    }

    pub fn pressure_level(&self) -> MemoryPressureLevel {
        self.lock().pressure
    }

    /// Records a lookup served from memory.
    pub fn record_hit(&self) {
        self.lock().counters.hits += 1;
    }

    /// Records a lookup that memory could not serve.
    pub fn record_miss(&self) {
        self.lock().counters.misses += 1;
    }

    /// Records a memory miss that the disk tier served.
    pub fn record_disk_hit(&self) {
        self.lock().counters.disk_hits += 1;
    }

    pub fn statistics(&self) -> CacheStatistics {
        let inner = self.lock();
        let Counters { hits, misses, disk_hits } = inner.counters;
        CacheStatistics {
            hits,
            misses,
            evictions: self.evictions.get(),
            hit_rate: CacheStatistics::hit_rate(hits, misses),
            disk_hits,
            resident_count: inner.entries.len(),
            resident_cost: inner.total_cost,
            cost_limit: inner.cost_limit,
        }
    }

    pub fn reset_statistics(&self) {
        self.lock().counters = Counters::default();
        self.evictions.reset();
    }

    /// [`remove_all`](Self::remove_all) followed by a statistics reset.
    pub fn clear(&self) {
        self.remove_all();
        self.reset_statistics();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_cost(&self) -> u64 {
        self.lock().total_cost
    }

    pub fn cost_limit(&self) -> u64 {
        self.lock().cost_limit
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pressure::CRITICAL_COST_FLOOR;
    use image::RgbaImage;

    const ITEM_COST: u64 = 1_000;

    fn key(n: usize) -> ThumbnailKey {
        ThumbnailKey::new(format!("/photos/DSC{n:04}.ARW")).unwrap()
    }

    fn payload() -> Arc<Thumbnail> {
        Arc::new(Thumbnail::new(RgbaImage::new(10, 10)).unwrap())
    }

    fn config(total_cost_limit: u64, count_limit: usize) -> CacheConfig {
        CacheConfig::new(total_cost_limit, count_limit, 4).unwrap()
    }

    fn fill(cache: &MemoryCache, count: usize) {
        for n in 0..count {
            cache.put(key(n), payload(), ITEM_COST);
        }
    }

    #[test]
    fn test_get_unknown_key_is_a_miss() {
        let cache = MemoryCache::new(CacheConfig::testing());
        assert!(cache.get(&key(1)).is_none());
        assert!(!cache.contains(&key(1)));
    }

    #[test]
    fn test_put_then_get() {
        let cache = MemoryCache::new(CacheConfig::testing());
        cache.insert(key(1), payload());
        let guard = cache.get(&key(1)).unwrap();
        assert_eq!(guard.dimensions(), (10, 10));
        assert_eq!(guard.cost(), 440);
        assert_eq!(cache.total_cost(), 440);
    }

    #[test]
    fn test_cost_budget_eviction() {
        let cache = MemoryCache::new(config(9 * ITEM_COST, 1000));
        fill(&cache, 10);
        let stats = cache.statistics();
        assert!(stats.evictions >= 1);
        assert!(stats.resident_cost <= 9 * ITEM_COST + ITEM_COST);
        assert_eq!(cache.len(), 9);
    }

    #[test]
    fn test_count_budget_eviction() {
        let cache = MemoryCache::new(config(u64::MAX, 3));
        fill(&cache, 5);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.statistics().evictions, 2);
    }

    #[test]
    fn test_least_recently_used_evicted_first() {
        let cache = MemoryCache::new(config(3 * ITEM_COST, 1000));
        fill(&cache, 3);
        // Touch the oldest entry so the second one becomes the eviction candidate.
        drop(cache.get(&key(0)));
        cache.put(key(3), payload(), ITEM_COST);
        assert!(cache.contains(&key(0)));
        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
    }

    #[test]
    fn test_eviction_skips_in_use_and_follows_recency() {
        let cache = MemoryCache::new(config(4 * ITEM_COST, 1000));
        fill(&cache, 4);
        let held = cache.get(&key(1)).unwrap();
        drop(cache.get(&key(0)));
        // Recency is now 2, 3, 1 (in use), 0.
        cache.put(key(4), payload(), ITEM_COST);
        cache.put(key(5), payload(), ITEM_COST);
        assert!(!cache.contains(&key(2)));
        assert!(!cache.contains(&key(3)));
        cache.put(key(6), payload(), ITEM_COST);
        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(0)));
        assert_eq!(cache.statistics().evictions, 3);
        assert_eq!(cache.len(), 4);

        drop(held);
        cache.put(key(7), payload(), ITEM_COST);
        assert!(!cache.contains(&key(1)));
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.total_cost(), 4 * ITEM_COST);
    }

    #[test]
    fn test_in_use_entries_are_never_evicted() {
        let cache = MemoryCache::new(config(2 * ITEM_COST, 1000));
        fill(&cache, 2);
        let first = cache.get(&key(0)).unwrap();
        let second = cache.get(&key(1)).unwrap();
        cache.put(key(2), payload(), ITEM_COST);
        // Nothing could be evicted, so the newest entry overflows the budget.
        assert_eq!(cache.statistics().evictions, 0);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.total_cost(), 3 * ITEM_COST);
        assert_eq!(first.width(), 10);
        drop(first);
        drop(second);
        // Once released, the next insert restores the bound.
        cache.put(key(3), payload(), ITEM_COST);
        assert!(cache.total_cost() <= 2 * ITEM_COST);
    }

    #[test]
    fn test_replacing_an_entry_is_not_an_eviction() {
        let cache = MemoryCache::new(config(10 * ITEM_COST, 1000));
        cache.put(key(1), payload(), ITEM_COST);
        cache.put(key(1), payload(), 2 * ITEM_COST);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 2 * ITEM_COST);
        assert_eq!(cache.statistics().evictions, 0);
    }

    #[test]
    fn test_zero_limits_do_not_crash() {
        let cache = MemoryCache::new(config(0, 0));
        fill(&cache, 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.statistics().evictions, 2);
        assert!(cache.get(&key(2)).is_some());
    }

    #[test]
    fn test_configure_is_not_retroactive() {
        let cache = MemoryCache::new(config(10 * ITEM_COST, 1000));
        fill(&cache, 5);
        cache.configure(config(2 * ITEM_COST, 1000));
        cache.configure(config(2 * ITEM_COST, 1000));
        assert_eq!(cache.len(), 5);
        cache.put(key(5), payload(), ITEM_COST);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.statistics().evictions, 4);
    }

    #[test]
    fn test_remove_all_honours_readers() {
        let cache = MemoryCache::new(config(10 * ITEM_COST, 1000));
        fill(&cache, 3);
        let held = cache.get(&key(0)).unwrap();
        cache.remove_all();
        assert!(cache.is_empty());
        assert_eq!(cache.total_cost(), 0);
        assert!(cache.get(&key(0)).is_none());
        // The reader still has valid pixels.
        assert_eq!(held.dimensions(), (10, 10));
    }

    #[test]
    fn test_warning_pressure_trims_to_sixty_percent() {
        let cache = MemoryCache::new(config(10 * ITEM_COST, 1000));
        fill(&cache, 10);
        cache.apply_pressure(MemoryPressureLevel::Warning);
        assert_eq!(cache.cost_limit(), 6 * ITEM_COST);
        assert_eq!(cache.len(), 6);
        // Repeated warnings don't compound.
        cache.apply_pressure(MemoryPressureLevel::Warning);
        assert_eq!(cache.cost_limit(), 6 * ITEM_COST);
        cache.apply_pressure(MemoryPressureLevel::Normal);
        assert_eq!(cache.cost_limit(), 10 * ITEM_COST);
        assert_eq!(cache.len(), 6);
    }

    #[test]
    fn test_critical_pressure_clears_idle_entries() {
        let cache = MemoryCache::new(config(5000 * 1024 * 1024, 1000));
        fill(&cache, 4);
        let held = cache.get(&key(3)).unwrap();
        cache.apply_pressure(MemoryPressureLevel::Critical);
        assert_eq!(cache.cost_limit(), CRITICAL_COST_FLOOR);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&key(3)));
        assert_eq!(cache.pressure_level(), MemoryPressureLevel::Critical);
        drop(held);
        // Reconfiguring while critical keeps the floor until pressure eases.
        cache.configure(config(6000 * 1024 * 1024, 1000));
        assert_eq!(cache.cost_limit(), CRITICAL_COST_FLOOR);
        cache.apply_pressure(MemoryPressureLevel::Normal);
        assert_eq!(cache.cost_limit(), 6000 * 1024 * 1024);
    }

    #[test]
    fn test_statistics_and_clear() {
        let cache = MemoryCache::new(config(2 * ITEM_COST, 1000));
        fill(&cache, 3);
        cache.record_hit();
        cache.record_hit();
        cache.record_hit();
        cache.record_miss();
        cache.record_disk_hit();
        let stats = cache.statistics();
        assert_eq!((stats.hits, stats.misses, stats.disk_hits), (3, 1, 1));
        assert_eq!(stats.hit_rate, 75.0);
        assert_eq!(stats.evictions, 1);
        cache.clear();
        let stats = cache.statistics();
        assert_eq!((stats.hits, stats.misses, stats.evictions), (0, 0, 0));
        assert_eq!(stats.hit_rate, 0.0);
        assert_eq!(stats.resident_count, 0);
    }

    #[test]
    fn test_eviction_counter_handle_tracks_cache() {
        let cache = MemoryCache::new(config(ITEM_COST, 1000));
        let counter = cache.eviction_counter();
        fill(&cache, 3);
        assert_eq!(counter.get(), 2);
    }
}
