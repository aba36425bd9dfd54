use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Number of recent completion intervals the estimate is averaged over.
pub const ESTIMATE_WINDOW: usize = 10;
/// Completions required before any estimate is produced.
pub const ESTIMATE_MIN_SAMPLES: u64 = 10;

/// Tracks batch progress and produces a time-remaining estimate.
///
/// The estimate is the moving average of the last [`ESTIMATE_WINDOW`]
/// completion intervals multiplied by the number of items left, truncated to
/// whole seconds. It never goes up: a new estimate larger than the one last
/// reported is suppressed. The first completion has no predecessor and
/// contributes no interval.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    total: u64,
    processed: u64,
    intervals: VecDeque<Duration>,
    last_completion: Option<Instant>,
    estimate: Option<u64>,
}

impl BatchProgress {
    pub fn new(total: u64) -> Self {
        Self { total, processed: 0, intervals: VecDeque::with_capacity(ESTIMATE_WINDOW), last_completion: None, estimate: None }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Last estimate reported, in whole seconds.
    pub fn estimate(&self) -> Option<u64> {
        self.estimate
    }

    /// Record an item completing at `now`. Returns the new estimate (seconds)
    /// if one should be shown.
    pub fn complete_at(&mut self, now: Instant) -> Option<u64> {
        let interval = self.last_completion.replace(now).map(|last| now.saturating_duration_since(last));
        self.record(interval)
    }

    /// Record an item completing `interval` after the previous one.
    pub fn complete_after(&mut self, interval: Duration) -> Option<u64> {
        self.record(Some(interval))
    }

    fn record(&mut self, interval: Option<Duration>) -> Option<u64> {
        self.processed = self.processed.saturating_add(1);
        if let Some(interval) = interval {
            if self.intervals.len() == ESTIMATE_WINDOW {
                self.intervals.pop_front();
            }
            self.intervals.push_back(interval);
        }

        if self.processed < ESTIMATE_MIN_SAMPLES || self.intervals.is_empty() {
            return None;
        }
        let average = self.intervals.iter().sum::<Duration>().as_secs_f64() / self.intervals.len() as f64;
        let remaining = self.total.saturating_sub(self.processed);
        let seconds = (average * remaining as f64) as u64;
        match self.estimate {
            Some(previous) if seconds > previous => None,
            _ => {
                self.estimate = Some(seconds);
                Some(seconds)
            },
        }
    }
}
