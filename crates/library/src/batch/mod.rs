//! Directory-wide batch processing.
//!
//! A batch lists the eligible files directly inside a directory and runs one
//! operation per file with bounded concurrency: either warming the thumbnail
//! caches through the [`Resolver`], or exporting each file's embedded preview
//! as a sibling JPEG.
//!
//! Only one batch runs per [`BatchPipeline`] at a time. Starting a batch
//! cancels the previous one, which stops issuing new work and lets operations
//! already in flight finish.

pub mod error;
mod export;
mod progress;

pub use crate::batch::export::{PREVIEW_JPEG_QUALITY, export_preview, preview_path};
pub use crate::batch::progress::{BatchProgress, ESTIMATE_MIN_SAMPLES, ESTIMATE_WINDOW};

use crate::batch::error::{ErrorKind as BatchErrorKind, Result as BatchResult};
use crate::error::{ErrorKind as LibraryErrorKind, Result as LibraryResult};
use crate::resolve::Resolver;
use async_stream::stream;
use exn::ResultExt;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use loupe_storage::{ThumbnailKey, discover};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Progress events emitted while a batch works through a directory.
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) exactly once.
/// 2. [`DiscoveryComplete`](Self::DiscoveryComplete) exactly once, with the
///    number of eligible files.
/// 3. [`Processed`](Self::Processed) once per successful file, each possibly
///    followed by an [`Estimate`](Self::Estimate).
/// 4. [`Complete`](Self::Complete) or [`Cancelled`](Self::Cancelled) exactly
///    once, with the number of successful files.
///
/// A discovery failure terminates the stream early, in which case neither of
/// the final events is emitted. Individual file failures are `Err` items that
/// do not terminate the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    Started,
    DiscoveryComplete(u64),
    Processed { path: PathBuf, processed: u64, total: u64 },
    /// Estimated time remaining, in whole seconds. Never increases.
    Estimate(Duration),
    Complete(u64),
    Cancelled(u64),
}

pub struct BatchPipeline {
    resolver: Resolver,
    extensions: RwLock<Vec<String>>,
    concurrency: usize,
    current: Mutex<Option<CancellationToken>>,
}

impl BatchPipeline {
    pub fn new(resolver: Resolver, extensions: Vec<String>) -> Self {
        Self {
            resolver,
            extensions: RwLock::new(extensions),
            concurrency: crate::worker_count(),
            current: Mutex::new(None),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn extensions(&self) -> Vec<String> {
        self.extensions.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Takes effect for batches started from now on.
    pub fn set_extensions(&self, extensions: Vec<String>) {
        *self.extensions.write().unwrap_or_else(PoisonError::into_inner) = extensions;
    }

    /// Cancel the batch currently running, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.current.lock().unwrap_or_else(PoisonError::into_inner).take() {
            tracing::info!("Cancelling batch");
            token.cancel();
        }
    }

    fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = self.current.lock().unwrap_or_else(PoisonError::into_inner).replace(token.clone());
        if let Some(previous) = previous {
            tracing::debug!("New batch supersedes the one still running");
            previous.cancel();
        }
        token
    }

    /// Streams [`BatchEvent`]s while resolving a `target_size` thumbnail for
    /// every eligible file in `directory`, leaving them in both cache tiers.
    pub fn warm<'a>(
        &'a self,
        directory: &'a Path,
        target_size: u32,
    ) -> impl Stream<Item = LibraryResult<BatchEvent>> + 'a {
        let resolver = &self.resolver;
        self.process(directory, self.begin(), move |path| warm_one(resolver, path, target_size))
    }

    /// Streams [`BatchEvent`]s while writing the embedded preview of every
    /// eligible file in `directory` to a sibling `.jpg`.
    pub fn export<'a>(
        &'a self,
        directory: &'a Path,
        full_size: bool,
    ) -> impl Stream<Item = LibraryResult<BatchEvent>> + 'a {
        self.process(directory, self.begin(), move |path| export_one(path, full_size))
    }

    /// Warm the caches for `directory`, returning how many files succeeded.
    ///
    /// # Errors
    ///
    /// Only if the directory cannot be listed. Individual failures are logged
    /// and skipped.
    pub async fn run(&self, directory: &Path, target_size: u32) -> LibraryResult<u64> {
        drain(self.warm(directory, target_size)).await
    }

    /// Export previews for `directory`, returning how many files succeeded.
    pub async fn run_export(&self, directory: &Path, full_size: bool) -> LibraryResult<u64> {
        drain(self.export(directory, full_size)).await
    }

    fn process<'a, F, Fut>(
        &'a self,
        directory: &'a Path,
        token: CancellationToken,
        operation: F,
    ) -> impl Stream<Item = LibraryResult<BatchEvent>> + 'a
    where
        F: Fn(PathBuf) -> Fut + 'a,
        Fut: Future<Output = BatchResult<PathBuf>> + 'a,
    {
        let concurrency = self.concurrency;
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            yield Ok(BatchEvent::Started);
            let started = Instant::now();

            let extensions = self.extensions();
            let files = match discover(directory, &extensions)
                .await
                .or_raise(|| LibraryErrorKind::Discovery(directory.to_path_buf()))
            {
                Ok(files) => files,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            // Infallible: a usize (either 32- or 64-bit) will always fit in a u64.
            let total = u64::try_from(files.len()).unwrap_or(0);
            tracing::info!(directory = %directory.display(), total, "Starting batch");
            yield Ok(BatchEvent::DiscoveryComplete(total));

            let mut progress = BatchProgress::new(total);
            let mut pending = files.into_iter().map(|path| {
                let attempt = operation(path.clone());
                async move { (path, attempt.await) }
            });
            let mut processing = FuturesUnordered::new();
            if !token.is_cancelled() {
                processing.extend(pending.by_ref().take(concurrency));
            }
            while let Some((path, result)) = processing.next().await {
                match result {
                    Ok(path) => {
                        let estimate = progress.complete_at(Instant::now());
                        yield Ok(BatchEvent::Processed { path, processed: progress.processed(), total });
                        if let Some(seconds) = estimate {
                            yield Ok(BatchEvent::Estimate(Duration::from_secs(seconds)));
                        }
                    },
                    Err(e) => yield Err(e.raise(LibraryErrorKind::Item(path))),
                }
                // Pop-n-push, but FIFO instead of LIFO.
                if !token.is_cancelled()
                    && let Some(next) = pending.next()
                {
                    processing.push(next);
                }
            }

            let succeeded = progress.processed();
            match token.is_cancelled() {
                true => {
                    tracing::info!(succeeded, total, "Batch cancelled");
                    yield Ok(BatchEvent::Cancelled(succeeded));
                },
                false => {
                    tracing::info!(succeeded, total, elapsed = ?started.elapsed(), "Batch complete");
                    yield Ok(BatchEvent::Complete(succeeded));
                },
            }
        })
    }
}

async fn warm_one(resolver: &Resolver, path: PathBuf, target_size: u32) -> BatchResult<PathBuf> {
    let key = ThumbnailKey::new(&path).or_raise(|| BatchErrorKind::InvalidPath(path.clone()))?;
    resolver.resolve(&key, target_size).await.or_raise(|| BatchErrorKind::Resolve)?;
    Ok(path)
}

async fn export_one(path: PathBuf, full_size: bool) -> BatchResult<PathBuf> {
    let source = path.clone();
    tokio::task::spawn_blocking(move || export_preview(&source, full_size))
        .await
        .or_raise(|| BatchErrorKind::Worker)??;
    Ok(path)
}

async fn drain(events: impl Stream<Item = LibraryResult<BatchEvent>>) -> LibraryResult<u64> {
    let mut events = std::pin::pin!(events);
    while let Some(event) = events.next().await {
        match event {
            Ok(BatchEvent::Complete(succeeded) | BatchEvent::Cancelled(succeeded)) => return Ok(succeeded),
            Ok(_) => {},
            Err(e) if matches!(&*e, LibraryErrorKind::Item(_)) => {
                tracing::warn!(error = ?e, "Skipping file");
            },
            Err(e) => return Err(e),
        }
    }
    Ok(0)
}
