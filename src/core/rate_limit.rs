//! Sliding-window limiter for outbound recognition calls.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Allows at most `max_calls` acquisitions in any `window`.
///
/// Shared by every worker thread; [`RateLimiter::acquire`] blocks the calling
/// thread and is meant to run inside blocking pipeline code.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    /// Blocks until a call slot is free, then takes it.
    pub fn acquire(&self) {
        loop {
            match self.try_acquire_at(Instant::now()) {
                Ok(()) => return,
                Err(wait) => {
                    tracing::debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
                    std::thread::sleep(wait);
                }
            }
        }
    }

    /// Takes a slot at `now`, or returns how long until one frees up.
    pub fn try_acquire_at(&self, now: Instant) -> Result<(), Duration> {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(oldest) = calls.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                calls.pop_front();
            } else {
                break;
            }
        }
        if calls.len() < self.max_calls {
            calls.push_back(now);
            return Ok(());
        }
        let oldest = calls.front().copied().unwrap_or(now);
        Err((oldest + self.window).saturating_duration_since(now).max(Duration::from_millis(1)))
    }
}
