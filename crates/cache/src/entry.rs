//! Discardable cache entries.
//!
//! An entry may only be discarded while nobody is reading it. Readers bracket
//! their use with [`begin_access`](CacheEntry::begin_access) and
//! [`end_access`](CacheEntry::end_access); in practice they never call those
//! directly and hold an [`AccessGuard`] instead.

use loupe_codec::Thumbnail;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct AccessState {
    access_count: u32,
    discarded: bool,
}

#[derive(Debug)]
pub struct CacheEntry {
    payload: Arc<Thumbnail>,
    cost: u64,
    state: Mutex<AccessState>,
}

impl CacheEntry {
    pub fn new(payload: Arc<Thumbnail>, cost: u64) -> Self {
        Self { payload, cost, state: Mutex::new(AccessState::default()) }
    }

    pub fn cost(&self) -> u64 {
        self.cost
    }

    pub fn payload(&self) -> &Arc<Thumbnail> {
        &self.payload
    }

    /// Registers a reader. Fails if the entry has already been discarded.
    pub fn begin_access(&self) -> bool {
        let mut state = self.state();
        if state.discarded {
            return false;
        }
        state.access_count += 1;
        true
    }

    /// Unregisters a reader. Never drops below zero.
    pub fn end_access(&self) {
        let mut state = self.state();
        state.access_count = state.access_count.saturating_sub(1);
    }

    /// Discards the entry if no reader holds it. Returns whether the entry is
    /// now discarded (including when it already was).
    pub fn discard_if_possible(&self) -> bool {
        let mut state = self.state();
        if state.access_count > 0 {
            return false;
        }
        state.discarded = true;
        true
    }

    pub fn is_discarded(&self) -> bool {
        self.state().discarded
    }

    pub fn access_count(&self) -> u32 {
        self.state().access_count
    }

    pub fn is_in_use(&self) -> bool {
        self.access_count() > 0
    }

    // The state is two plain fields; a panic elsewhere can't leave them torn.
    fn state(&self) -> MutexGuard<'_, AccessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped read access to a cached thumbnail.
///
/// Dropping the guard ends the access exactly once, on every exit path.
#[derive(Debug)]
pub struct AccessGuard {
    entry: Arc<CacheEntry>,
}

impl AccessGuard {
    /// Starts an access on `entry`, or returns `None` if it was discarded.
    pub fn acquire(entry: Arc<CacheEntry>) -> Option<Self> {
        match entry.begin_access() {
            true => Some(Self { entry }),
            false => None,
        }
    }

    /// Shared handle to the pixels that outlives the guard.
    pub fn thumbnail(&self) -> Arc<Thumbnail> {
        Arc::clone(&self.entry.payload)
    }

    pub fn cost(&self) -> u64 {
        self.entry.cost
    }
}

impl Deref for AccessGuard {
    type Target = Thumbnail;
    fn deref(&self) -> &Thumbnail {
        &self.entry.payload
    }
}

impl Drop for AccessGuard {
    fn drop(&mut self) {
        self.entry.end_access();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn entry() -> Arc<CacheEntry> {
        let thumbnail = Thumbnail::new(RgbaImage::new(4, 4)).unwrap();
        Arc::new(CacheEntry::new(Arc::new(thumbnail), 70))
    }

    #[test]
    fn test_access_counting() {
        let entry = entry();
        assert!(entry.begin_access());
        assert!(entry.begin_access());
        assert_eq!(entry.access_count(), 2);
        entry.end_access();
        entry.end_access();
        assert_eq!(entry.access_count(), 0);
        // Floored at zero.
        entry.end_access();
        assert_eq!(entry.access_count(), 0);
    }

    #[test]
    fn test_in_use_entries_cannot_be_discarded() {
        let entry = entry();
        assert!(entry.begin_access());
        assert!(!entry.discard_if_possible());
        assert!(!entry.is_discarded());
        entry.end_access();
        assert!(entry.discard_if_possible());
        assert!(entry.is_discarded());
        assert_eq!(entry.access_count(), 0);
    }

    #[test]
    fn test_discarded_entries_reject_access() {
        let entry = entry();
        assert!(entry.discard_if_possible());
        assert!(!entry.begin_access());
        assert_eq!(entry.access_count(), 0);
        assert!(AccessGuard::acquire(entry).is_none());
    }

    #[test]
    fn test_guard_releases_exactly_once() {
        let entry = entry();
        let first = AccessGuard::acquire(Arc::clone(&entry)).unwrap();
        let second = AccessGuard::acquire(Arc::clone(&entry)).unwrap();
        assert_eq!(entry.access_count(), 2);
        assert_eq!(first.dimensions(), (4, 4));
        drop(first);
        assert_eq!(entry.access_count(), 1);
        let pixels = second.thumbnail();
        drop(second);
        assert_eq!(entry.access_count(), 0);
        // The payload stays valid after the guard is gone.
        assert_eq!(pixels.width(), 4);
    }

    #[test]
    fn test_guard_releases_on_early_return() {
        fn peek(entry: &Arc<CacheEntry>) -> Option<u32> {
            let guard = AccessGuard::acquire(Arc::clone(entry))?;
            if guard.width() > 1 {
                return None;
            }
            Some(guard.height())
        }
        let entry = entry();
        assert_eq!(peek(&entry), None);
        assert_eq!(entry.access_count(), 0);
    }
}
