//! # Watch Configuration
//!
//! Parameters for folder watching: stabilization delay, cache bypass, the
//! watched suffix set and how many diagrams may be processed at once.
//!
//! ## Configuration Parameters
//!
//! | Parameter | Type | Default | Description |
//! |-----------|------|---------|-------------|
//! | `delay_minutes` | `u64` | 15 | Quiet period after the last edit (0 = process immediately) |
//! | `force` | `bool` | false | Bypass the output cache |
//! | `extensions` | `Vec<String>` | `.excalidraw.md`, `.excalidraw` | Watched file suffixes |
//! | `concurrency` | `usize` | 3 | Max simultaneous `process_file` runs |
//! | `debounce_window` | `Duration` | 1s | Duplicate-event suppression window |
//! | `stability_interval` | `Duration` | 500ms | Gap between the two size reads |
//! | `delay_override` | `Option<Duration>` | `None` | Sub-minute delay replacing `delay_minutes` |
//!
//! Delays above [`MAX_DELAY_MINUTES`] are rejected by [`WatchConfig::validate`].
//!
//! The delay can also come from the `STABILIZATION_DELAY_MINUTES` environment
//! variable, see [`WatchConfig::from_env_delay`].
//!
//! ## Examples
//!
//! ```rust
//! use excalidraw_ocr::config::WatchConfig;
//!
//! let config = WatchConfig {
//!     delay_minutes: 0,
//!     ..WatchConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! assert_eq!(config.poll_interval().as_secs(), 1);
//! ```

use std::time::Duration;

/// Environment variable overriding the default stabilization delay.
pub const DELAY_ENV_VAR: &str = "STABILIZATION_DELAY_MINUTES";

/// Default stabilization delay in minutes.
pub const DEFAULT_DELAY_MINUTES: u64 = 15;

/// Longest accepted stabilization delay (one week).
pub const MAX_DELAY_MINUTES: u64 = 7 * 24 * 60;

/// Folder-watch configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Minutes a diagram must stay unchanged before it is processed.
    ///
    /// Every new event for the same file restarts the countdown. Zero disables
    /// the stabilization queue entirely and dispatches stable files right away.
    pub delay_minutes: u64,

    /// Reprocess even when the cached output fingerprint matches.
    pub force: bool,

    /// File name suffixes that are considered diagrams.
    pub extensions: Vec<String>,

    /// File name suffixes of editor/backup files that are never processed.
    pub ignore_suffixes: Vec<String>,

    /// Maximum number of diagrams processed concurrently.
    ///
    /// Bounds simultaneous rasterizer runs and outbound recognition requests.
    pub concurrency: usize,

    /// Events for the same path closer together than this are dropped.
    pub debounce_window: Duration,

    /// Debounce entries kept before old ones are pruned.
    pub debounce_ceiling: usize,

    /// Age after which debounce entries are pruned once the ceiling is hit.
    pub debounce_max_age: Duration,

    /// Wait between the two size reads of a stability check.
    pub stability_interval: Duration,

    /// Stability attempts for freshly created files.
    pub create_attempts: usize,

    /// Backoff step before each creation stability attempt (multiplied by attempt number).
    pub create_backoff_step: Duration,

    /// Explicit polling interval; derived from the delay when `None`.
    pub poll_interval_override: Option<Duration>,

    /// Exact stabilization delay; takes precedence over `delay_minutes`.
    pub delay_override: Option<Duration>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            delay_minutes: DEFAULT_DELAY_MINUTES,
            force: false,
            extensions: vec![".excalidraw.md".to_string(), ".excalidraw".to_string()],
            ignore_suffixes: vec![
                ".swp".to_string(),
                "~".to_string(),
                ".tmp".to_string(),
                ".bak".to_string(),
            ],
            concurrency: 3,
            debounce_window: Duration::from_secs(1),
            debounce_ceiling: 1000,
            debounce_max_age: Duration::from_secs(3600),
            stability_interval: Duration::from_millis(500),
            create_attempts: 3,
            create_backoff_step: Duration::from_millis(100),
            poll_interval_override: None,
            delay_override: None,
        }
    }
}

impl WatchConfig {
    /// Reads the stabilization delay from the environment.
    ///
    /// Missing variable means the default; an unparsable value is logged and
    /// also falls back to the default.
    pub fn from_env_delay() -> u64 {
        match std::env::var(DELAY_ENV_VAR) {
            Ok(raw) => parse_delay(&raw).unwrap_or_else(|| {
                tracing::warn!(
                    value = %raw,
                    "Invalid {}, using default {}",
                    DELAY_ENV_VAR,
                    DEFAULT_DELAY_MINUTES
                );
                DEFAULT_DELAY_MINUTES
            }),
            Err(_) => DEFAULT_DELAY_MINUTES,
        }
    }

    /// Stabilization delay as a duration.
    pub fn delay(&self) -> Duration {
        self.delay_override
            .unwrap_or_else(|| Duration::from_secs(self.delay_minutes.saturating_mul(60)))
    }

    /// Whether the stabilization queue is in use.
    pub fn uses_stabilization(&self) -> bool {
        !self.delay().is_zero()
    }

    /// How often the live loop drains the stabilization queue.
    ///
    /// 10 seconds while a delay is active, 1 second otherwise.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_override.unwrap_or(if self.uses_stabilization() {
            Duration::from_secs(10)
        } else {
            Duration::from_secs(1)
        })
    }

    /// Whether the file name ends in one of the watched suffixes.
    pub fn matches_extension(&self, file_name: &str) -> bool {
        self.extensions.iter().any(|ext| file_name.ends_with(ext.as_str()))
    }

    /// Whether the file name looks like an editor temp or backup file.
    pub fn is_ignored(&self, file_name: &str) -> bool {
        self.ignore_suffixes
            .iter()
            .any(|suffix| file_name.ends_with(suffix.as_str()))
    }

    /// Watched suffix, not hidden, not an editor temp file.
    pub fn accepts_name(&self, file_name: &str) -> bool {
        !file_name.starts_with('.') && self.matches_extension(file_name) && !self.is_ignored(file_name)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("Concurrency must be greater than 0".to_string());
        }
        if self.delay_override.is_none() && self.delay_minutes > MAX_DELAY_MINUTES {
            return Err(format!(
                "Delay must be at most {} minutes, got {}",
                MAX_DELAY_MINUTES, self.delay_minutes
            ));
        }
        if self.extensions.is_empty() {
            return Err("At least one watched extension is required".to_string());
        }
        if self.extensions.iter().any(|ext| ext.is_empty()) {
            return Err("Watched extensions must not be empty strings".to_string());
        }
        if self.create_attempts == 0 {
            return Err("Creation stability attempts must be greater than 0".to_string());
        }
        if self.poll_interval().is_zero() {
            return Err("Poll interval must be greater than 0".to_string());
        }
        Ok(())
    }
}

fn parse_delay(raw: &str) -> Option<u64> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|minutes| *minutes <= MAX_DELAY_MINUTES)
}
