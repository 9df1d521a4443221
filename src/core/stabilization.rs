//! # Stabilization Tracker
//!
//! Holds diagrams that were recently edited until they have been left alone
//! for the configured delay. Each event for a path overwrites its timestamp, so
//! a file that keeps changing is never handed out.
//!
//! ```rust
//! use std::path::Path;
//! use std::time::{Duration, Instant};
//! use excalidraw_ocr::core::StabilizationTracker;
//!
//! let tracker = StabilizationTracker::new(Duration::from_secs(60));
//! let t0 = Instant::now();
//! tracker.touch_at(Path::new("a.excalidraw.md"), t0);
//! assert!(tracker.drain_ready_at(t0 + Duration::from_secs(59)).is_empty());
//! assert_eq!(tracker.drain_ready_at(t0 + Duration::from_secs(60)).len(), 1);
//! assert_eq!(tracker.pending_count(), 0);
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-path quiet-period tracker.
///
/// The map is guarded by a mutex held only for the insert, remove or drain
/// itself; no I/O happens under the lock.
#[derive(Debug)]
pub struct StabilizationTracker {
    delay: Duration,
    pending: Mutex<HashMap<PathBuf, Instant>>,
}

impl StabilizationTracker {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Records a modification now.
    pub fn touch(&self, path: &Path) {
        self.touch_at(path, Instant::now());
    }

    /// Records a modification at `now`, replacing any earlier timestamp.
    pub fn touch_at(&self, path: &Path, now: Instant) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.insert(path.to_path_buf(), now);
    }

    /// Forgets a path. Returns whether it was pending.
    pub fn remove(&self, path: &Path) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(path).is_some()
    }

    /// Removes and returns every path quiet for at least the delay.
    pub fn drain_ready(&self) -> Vec<PathBuf> {
        self.drain_ready_at(Instant::now())
    }

    /// Removes and returns every path whose last modification is at least
    /// `delay` before `now`, in path order.
    pub fn drain_ready_at(&self, now: Instant) -> Vec<PathBuf> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let mut ready: Vec<PathBuf> = pending
            .iter()
            .filter(|(_, touched)| now.saturating_duration_since(**touched) >= self.delay)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            pending.remove(path);
        }
        drop(pending);
        ready.sort();
        ready
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Snapshot of pending paths, sorted.
    pub fn pending_paths(&self) -> Vec<PathBuf> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let mut paths: Vec<PathBuf> = pending.keys().cloned().collect();
        drop(pending);
        paths.sort();
        paths
    }
}
