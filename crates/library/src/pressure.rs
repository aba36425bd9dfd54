//! Host memory pressure handling.
//!
//! A [`PressureSource`] reports the host's memory pressure level as a stream.
//! The [`PressureMonitor`] listens to it and, on every *change* of level,
//! adapts the memory cache's budget and notifies an optional observer.

use async_stream::stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use loupe_cache::{MemoryCache, MemoryPressureLevel};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use sysinfo::System;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Used memory (percent of total) at which the system source reports `Warning`.
pub const WARNING_USED_PERCENT: u64 = 80;
/// Used memory (percent of total) at which the system source reports `Critical`.
pub const CRITICAL_USED_PERCENT: u64 = 95;

/// Something that can tell us how much memory pressure the host is under.
pub trait PressureSource: Send + Sync {
    /// A stream of levels. Repeats are allowed; the monitor only acts on changes.
    fn subscribe(&self) -> BoxStream<'static, MemoryPressureLevel>;
}

/// Polls physical memory usage.
#[derive(Debug, Clone)]
pub struct SystemPressureSource {
    interval: Duration,
}

impl SystemPressureSource {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Level for `used` bytes out of `total`.
    pub fn classify(used: u64, total: u64) -> MemoryPressureLevel {
        if total == 0 {
            return MemoryPressureLevel::Normal;
        }
        let percent = u128::from(used) * 100 / u128::from(total);
        match percent {
            p if p >= u128::from(CRITICAL_USED_PERCENT) => MemoryPressureLevel::Critical,
            p if p >= u128::from(WARNING_USED_PERCENT) => MemoryPressureLevel::Warning,
            _ => MemoryPressureLevel::Normal,
        }
    }
}

impl Default for SystemPressureSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl PressureSource for SystemPressureSource {
    fn subscribe(&self) -> BoxStream<'static, MemoryPressureLevel> {
        let period = self.interval;
        Box::pin(stream! {
            let mut system = System::new();
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                system.refresh_memory();
                yield Self::classify(system.used_memory(), system.total_memory());
            }
        })
    }
}

/// A source driven by hand, for embedding applications that get pressure
/// notifications from elsewhere (and for tests).
#[derive(Debug, Clone)]
pub struct ChannelPressureSource {
    sender: Arc<watch::Sender<MemoryPressureLevel>>,
}

impl ChannelPressureSource {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(MemoryPressureLevel::Normal);
        Self { sender: Arc::new(sender) }
    }

    pub fn send(&self, level: MemoryPressureLevel) {
        self.sender.send_replace(level);
    }
}

impl Default for ChannelPressureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PressureSource for ChannelPressureSource {
    fn subscribe(&self) -> BoxStream<'static, MemoryPressureLevel> {
        let mut receiver = self.sender.subscribe();
        Box::pin(stream! {
            loop {
                let level = *receiver.borrow_and_update();
                yield level;
                if receiver.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}

/// Called with `true` when pressure becomes elevated and `false` when it
/// returns to normal.
pub type PressureObserver = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PressureStatistics {
    pub current: MemoryPressureLevel,
    pub transitions: u64,
    pub warnings: u64,
    pub criticals: u64,
}

#[derive(Debug, Default)]
struct Counters {
    transitions: AtomicU64,
    warnings: AtomicU64,
    criticals: AtomicU64,
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PressureMonitor {
    cache: Arc<MemoryCache>,
    observer: Option<PressureObserver>,
    counters: Arc<Counters>,
    running: Mutex<Option<Running>>,
}

impl PressureMonitor {
    pub fn new(cache: Arc<MemoryCache>) -> Self {
        Self { cache, observer: None, counters: Arc::default(), running: Mutex::new(None) }
    }

    pub fn with_observer(mut self, observer: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Start listening to `source`. Returns `false` (and does nothing) if
    /// already running.
    pub fn start(&self, source: &dyn PressureSource) -> bool {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(listen(
            source.subscribe(),
            token.clone(),
            Arc::clone(&self.cache),
            self.observer.clone(),
            Arc::clone(&self.counters),
        ));
        *running = Some(Running { token, handle });
        tracing::info!("Memory pressure monitoring started");
        true
    }

    /// Stop listening. Safe to call when not running.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(Running { token, handle }) = running {
            token.cancel();
            if let Err(e) = handle.await
                && e.is_panic()
            {
                tracing::error!("Memory pressure monitor panicked");
            }
            tracing::info!("Memory pressure monitoring stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().unwrap_or_else(PoisonError::into_inner).as_ref().is_some_and(|r| !r.handle.is_finished())
    }

    pub fn statistics(&self) -> PressureStatistics {
        PressureStatistics {
            current: self.cache.pressure_level(),
            transitions: self.counters.transitions.load(Ordering::Relaxed),
            warnings: self.counters.warnings.load(Ordering::Relaxed),
            criticals: self.counters.criticals.load(Ordering::Relaxed),
        }
    }
}

impl Drop for PressureMonitor {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            running.token.cancel();
        }
    }
}

async fn listen(
    mut levels: BoxStream<'static, MemoryPressureLevel>,
    token: CancellationToken,
    cache: Arc<MemoryCache>,
    observer: Option<PressureObserver>,
    counters: Arc<Counters>,
) {
    let mut current = cache.pressure_level();
    loop {
        let level = tokio::select! {
            _ = token.cancelled() => break,
            next = levels.next() => match next {
                Some(level) => level,
                None => break,
            },
        };
        if level == current {
            continue;
        }
        tracing::info!(from = %current, to = %level, "Memory pressure changed");
        counters.transitions.fetch_add(1, Ordering::Relaxed);
        match level {
            MemoryPressureLevel::Warning => counters.warnings.fetch_add(1, Ordering::Relaxed),
            MemoryPressureLevel::Critical => counters.criticals.fetch_add(1, Ordering::Relaxed),
            MemoryPressureLevel::Normal => 0,
        };
        cache.apply_pressure(level);
        if let Some(observer) = &observer {
            observer(level.is_elevated());
        }
        current = level;
    }
}
