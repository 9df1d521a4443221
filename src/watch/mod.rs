//! # Watch Dispatcher
//!
//! Decides what to do with each filesystem event for a watched folder.
//!
//! ## Event Handling
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ notify event │──▶│ should_accept│──▶│ check_stable │──▶│ tracker (delay)  │
//! └──────────────┘   │ filter +     │   │ size, sleep, │   │ or process_file  │
//!                    │ debounce     │   │ size         │   └──────────────────┘
//!                    └──────────────┘   └──────────────┘
//! ```
//!
//! Created files get up to three stability attempts with a growing pause in
//! front of each; modified files get one. Deletions drop the path from the
//! stabilization queue so a re-created file starts fresh.
//!
//! ## Concurrency
//!
//! [`WatchDispatcher::process_file`] takes a semaphore permit before running
//! the blocking pipeline on tokio's blocking pool. The permit is released on
//! every exit path, including a panic inside the pipeline, which surfaces as a
//! join error and is counted as a failure.
//! [`WatchDispatcher::process_file_unless_shutdown`] gives up while still
//! waiting for a permit once shutdown is requested, so queued work does not
//! hold the process open.

pub mod events;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tokio::sync::Semaphore;

use crate::config::WatchConfig;
use crate::core::{DebounceMap, PathGuard, Shutdown, StabilizationTracker};
use crate::error::{OcrError, OcrResult, classify};

pub use events::{WatchEvent, WatchEventKind, start_watcher, translate};

/// What a successful run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The diagram went through the pipeline and its output was written.
    Reprocessed,
    /// The cached output was still current.
    Cached,
}

/// Runs the full pipeline for one diagram. Called on a blocking thread.
pub trait FileProcessor: Send + Sync + 'static {
    fn process(&self, path: &Path, force: bool) -> OcrResult<ProcessOutcome>;
}

/// Per-session counters.
#[derive(Debug, Default)]
pub struct WatchStats {
    processed: AtomicUsize,
    cached: AtomicUsize,
    errors: AtomicUsize,
    vanished: AtomicUsize,
    skipped: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub processed: usize,
    pub cached: usize,
    pub errors: usize,
    /// Files that disappeared before or during processing; not errors.
    pub vanished: usize,
    /// Files dropped because shutdown arrived before they got a permit.
    pub skipped: usize,
}

impl WatchStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            cached: self.cached.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            vanished: self.vanished.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

pub struct WatchDispatcher {
    config: WatchConfig,
    guard: PathGuard,
    debounce: DebounceMap,
    tracker: StabilizationTracker,
    permits: Arc<Semaphore>,
    processor: Arc<dyn FileProcessor>,
    stats: WatchStats,
}

impl std::fmt::Debug for WatchDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchDispatcher")
            .field("config", &self.config)
            .field("pending", &self.tracker.pending_count())
            .field("available_permits", &self.permits.available_permits())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl WatchDispatcher {
    pub fn new(config: WatchConfig, processor: Arc<dyn FileProcessor>) -> Self {
        let debounce = DebounceMap::new(
            config.debounce_window,
            config.debounce_ceiling,
            config.debounce_max_age,
        );
        let tracker = StabilizationTracker::new(config.delay());
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            config,
            guard: PathGuard::new(),
            debounce,
            tracker,
            permits,
            processor,
            stats: WatchStats::default(),
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn tracker(&self) -> &StabilizationTracker {
        &self.tracker
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the name alone makes the path a candidate: watched suffix,
    /// not hidden, not an editor temp file.
    pub fn is_candidate(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.config.accepts_name(name)
    }

    pub fn should_accept(&self, path: &Path) -> bool {
        self.should_accept_at(path, Instant::now())
    }

    /// Filters an event path and records it in the debounce map.
    pub fn should_accept_at(&self, path: &Path, now: Instant) -> bool {
        if !self.is_candidate(path) {
            return false;
        }
        if self.guard.validate_watch_target(path).is_err() {
            return false;
        }
        self.debounce.should_accept_at(path, now)
    }

    /// Two size reads `stability_interval` apart; stable iff equal and non-zero.
    pub async fn check_stable(&self, path: &Path) -> bool {
        let Ok(first) = tokio::fs::metadata(path).await.map(|m| m.len()) else {
            return false;
        };
        tokio::time::sleep(self.config.stability_interval).await;
        let Ok(second) = tokio::fs::metadata(path).await.map(|m| m.len()) else {
            return false;
        };
        first == second && second > 0
    }

    /// Stability check for a freshly created file, retried with a growing pause.
    pub async fn wait_until_stable(&self, path: &Path) -> bool {
        for attempt in 1..=self.config.create_attempts {
            tokio::time::sleep(self.config.create_backoff_step * attempt as u32).await;
            if self.check_stable(path).await {
                return true;
            }
        }
        false
    }

    pub async fn handle_event(&self, event: WatchEvent) {
        let WatchEvent { path, kind } = event;
        match kind {
            WatchEventKind::Deleted => {
                if self.tracker.remove(&path) {
                    tracing::info!(file = %display_name(&path), "Removed deleted file from queue");
                }
            }
            WatchEventKind::Created | WatchEventKind::Modified => {
                if !self.should_accept(&path) {
                    return;
                }
                let (stable, attempts) = if kind == WatchEventKind::Created {
                    tracing::info!(file = %display_name(&path), "Detected new file");
                    (self.wait_until_stable(&path).await, self.config.create_attempts)
                } else {
                    tracing::info!(file = %display_name(&path), "Detected modification");
                    (self.check_stable(&path).await, 1)
                };
                if !stable {
                    tracing::warn!("{}, skipping", OcrError::file_unstable(&path, attempts));
                    return;
                }
                self.dispatch(path).await;
            }
        }
    }

    /// Queues a stable file, or processes it right away when no delay is set.
    pub async fn dispatch(&self, path: PathBuf) {
        if self.config.uses_stabilization() {
            self.tracker.touch(&path);
            tracing::info!(
                file = %display_name(&path),
                delay = ?self.config.delay(),
                "Queued, will process if unchanged"
            );
        } else {
            self.process_file(path).await;
        }
    }

    /// Runs the pipeline for one file under a concurrency permit.
    pub async fn process_file(&self, path: PathBuf) {
        let Ok(_permit) = self.permits.acquire().await else {
            tracing::error!("Processing semaphore closed");
            return;
        };
        self.run_permitted(path).await;
    }

    /// Like [`process_file`](Self::process_file), but skips the file when
    /// shutdown is requested before a permit frees up. Returns whether the
    /// file was run.
    pub async fn process_file_unless_shutdown(&self, path: PathBuf, shutdown: &Shutdown) -> bool {
        let permit = if shutdown.is_triggered() {
            None
        } else {
            tokio::select! {
                biased;
                _ = shutdown.wait() => None,
                permit = self.permits.acquire() => Some(permit),
            }
        };
        let _permit = match permit {
            Some(Ok(permit)) if !shutdown.is_triggered() => permit,
            Some(Err(_)) => {
                tracing::error!("Processing semaphore closed");
                return false;
            }
            _ => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };
        self.run_permitted(path).await;
        true
    }

    async fn run_permitted(&self, path: PathBuf) {
        if !path.exists() {
            tracing::warn!(file = %path.display(), "File disappeared before processing");
            self.stats.vanished.fetch_add(1, Ordering::Relaxed);
            return;
        }

        tracing::info!(file = %display_name(&path), "Processing");
        let processor = Arc::clone(&self.processor);
        let force = self.config.force;
        let job_path = path.clone();
        let result = tokio::task::spawn_blocking(move || processor.process(&job_path, force)).await;

        match result {
            Ok(Ok(ProcessOutcome::Reprocessed)) => {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Ok(ProcessOutcome::Cached)) => {
                tracing::info!(file = %display_name(&path), "Using cached result");
                self.stats.cached.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(error)) if classify::is_vanished(&error) => {
                tracing::warn!(file = %path.display(), "File vanished during processing");
                self.stats.vanished.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(error)) => {
                tracing::error!(
                    file = %display_name(&path),
                    category = error.category(),
                    error = %error,
                    "Processing failed"
                );
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
            }
            Err(join_error) => {
                tracing::error!(file = %display_name(&path), error = %join_error, "Processing task panicked");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
