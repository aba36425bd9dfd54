use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

/// Counts evictions independently of the cache's main lock, so eviction
/// callbacks running outside the cache owner can update it.
#[derive(Debug, Clone, Default)]
pub struct EvictionCounter(Arc<Mutex<u64>>);

impl EvictionCounter {
    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, count: u64) {
        let mut evictions = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *evictions = evictions.saturating_add(count);
    }

    pub fn get(&self) -> u64 {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = 0;
    }
}

/// Point-in-time snapshot of cache counters.
///
/// `hits`, `misses`, `disk_hits` and `evictions` only grow, until an explicit
/// [`clear`](crate::MemoryCache::clear) or
/// [`reset_statistics`](crate::MemoryCache::reset_statistics).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Percentage of lookups served from memory; zero before any lookup.
    pub hit_rate: f64,
    /// Memory misses that were served from the disk tier.
    pub disk_hits: u64,
    pub resident_count: usize,
    pub resident_cost: u64,
    /// Cost limit currently in force (after any pressure adjustment).
    pub cost_limit: u64,
}

impl CacheStatistics {
    pub fn hit_rate(hits: u64, misses: u64) -> f64 {
        match hits + misses {
            0 => 0.0,
            total => hits as f64 / total as f64 * 100.0,
        }
    }
}
