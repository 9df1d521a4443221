//! Duplicate event suppression.
//!
//! Filesystem watchers commonly emit several events per save. An event for a
//! path seen less than `window` ago is dropped. The map is pruned once it grows
//! past `ceiling`, keeping only entries younger than `max_age`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct DebounceMap {
    window: Duration,
    ceiling: usize,
    max_age: Duration,
    last_seen: Mutex<HashMap<PathBuf, Instant>>,
}

impl DebounceMap {
    pub fn new(window: Duration, ceiling: usize, max_age: Duration) -> Self {
        Self {
            window,
            ceiling,
            max_age,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn should_accept(&self, path: &Path) -> bool {
        self.should_accept_at(path, Instant::now())
    }

    /// Records the event and reports whether it falls outside the window.
    ///
    /// Rejected events do not refresh the timestamp, so a steady stream of
    /// events still lets one through per window.
    pub fn should_accept_at(&self, path: &Path, now: Instant) -> bool {
        let mut last_seen = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(seen) = last_seen.get(path) {
            if now.saturating_duration_since(*seen) < self.window {
                return false;
            }
        }
        last_seen.insert(path.to_path_buf(), now);

        if last_seen.len() > self.ceiling {
            let before = last_seen.len();
            let max_age = self.max_age;
            last_seen.retain(|_, seen| now.saturating_duration_since(*seen) < max_age);
            tracing::debug!(
                pruned = before - last_seen.len(),
                remaining = last_seen.len(),
                "Pruned debounce entries"
            );
        }
        true
    }

    pub fn len(&self) -> usize {
        self.last_seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> DebounceMap {
        DebounceMap::new(Duration::from_secs(1), 1000, Duration::from_secs(3600))
    }

    #[test]
    fn drops_events_inside_window() {
        let debounce = map();
        let t0 = Instant::now();
        let path = Path::new("a.excalidraw.md");
        assert!(debounce.should_accept_at(path, t0));
        assert!(!debounce.should_accept_at(path, t0 + Duration::from_millis(500)));
        assert!(debounce.should_accept_at(path, t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn paths_are_independent() {
        let debounce = map();
        let t0 = Instant::now();
        assert!(debounce.should_accept_at(Path::new("a"), t0));
        assert!(debounce.should_accept_at(Path::new("b"), t0));
        assert_eq!(debounce.len(), 2);
    }

    #[test]
    fn prunes_old_entries_past_ceiling() {
        let debounce = DebounceMap::new(Duration::from_secs(1), 3, Duration::from_secs(60));
        let t0 = Instant::now();
        for name in ["a", "b", "c"] {
            assert!(debounce.should_accept_at(Path::new(name), t0));
        }
        // fourth entry crosses the ceiling; the first three are past max_age
        assert!(debounce.should_accept_at(Path::new("d"), t0 + Duration::from_secs(120)));
        assert_eq!(debounce.len(), 1);
    }
}
