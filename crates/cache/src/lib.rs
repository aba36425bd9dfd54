//! In-memory thumbnail cache.
//!
//! This crate provides the fast tier of the thumbnail cache: a bounded map of
//! decoded [`Thumbnail`](loupe_codec::Thumbnail)s keyed by
//! [`ThumbnailKey`](loupe_storage::ThumbnailKey). It is not a source of truth;
//! anything in it can be recreated from the disk tier or the source file.
//!
//! # Architecture
//! - **Budgets**: a [`CacheConfig`] bounds both the total estimated cost (bytes)
//!   and the number of resident entries. Costs come from [`estimate_cost`].
//! - **Discardable entries**: every [`CacheEntry`] tracks how many readers
//!   currently hold it. Readers get an [`AccessGuard`] from
//!   [`MemoryCache::get`]; an entry with an outstanding guard is never evicted.
//! - **Memory pressure**: [`MemoryCache::apply_pressure`] shrinks or clears the
//!   budget according to a [`MemoryPressureLevel`].

mod config;
mod cost;
mod entry;
pub mod error;
mod memory;
mod pressure;
mod stats;

pub use crate::config::CacheConfig;
pub use crate::cost::{COST_OVERHEAD_FACTOR, Dimensions, estimate_cost};
pub use crate::entry::{AccessGuard, CacheEntry};
pub use crate::memory::MemoryCache;
pub use crate::pressure::{CRITICAL_COST_FLOOR, MemoryPressureLevel, WARNING_COST_PERCENT};
pub use crate::stats::{CacheStatistics, EvictionCounter};
