use crate::cost::{Dimensions, estimate_cost};
use crate::error::{ErrorKind, Result};
use exn::OptionExt;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

const MIB: u64 = 1024 * 1024;

/// Budgets for a [`MemoryCache`](crate::MemoryCache).
///
/// Both limits may be zero, which degrades the cache to holding at most the
/// most recently inserted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Upper bound on the summed cost (bytes) of resident entries.
    pub total_cost_limit: u64,
    /// Upper bound on the number of resident entries.
    pub count_limit: usize,
    /// Bytes per pixel used by [`cost_of`](Self::cost_of). Four for RGBA.
    pub cost_per_pixel: NonZeroU32,
}

impl CacheConfig {
    pub const DEFAULT_COST_PER_PIXEL: NonZeroU32 = NonZeroU32::new(4).expect("4 is not zero");

    pub fn new(total_cost_limit: u64, count_limit: usize, cost_per_pixel: u32) -> Result<Self> {
        let cost_per_pixel = NonZeroU32::new(cost_per_pixel)
            .ok_or_raise(|| ErrorKind::InvalidConfig("cost per pixel must be greater than zero".to_string()))?;
        Ok(Self { total_cost_limit, count_limit, cost_per_pixel })
    }

    /// 500 MiB across at most 1000 thumbnails.
    pub const fn production() -> Self {
        Self {
            total_cost_limit: 500 * MIB,
            count_limit: 1000,
            cost_per_pixel: Self::DEFAULT_COST_PER_PIXEL,
        }
    }

    /// Deliberately tiny budgets so that eviction paths are easy to exercise.
    pub const fn testing() -> Self {
        Self {
            total_cost_limit: 100_000,
            count_limit: 5,
            cost_per_pixel: Self::DEFAULT_COST_PER_PIXEL,
        }
    }

    /// Estimated resident cost of a thumbnail under this configuration.
    pub fn cost_of(&self, dimensions: impl Into<Dimensions>) -> u64 {
        estimate_cost(dimensions.into(), self.cost_per_pixel)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::production()
    }
}
