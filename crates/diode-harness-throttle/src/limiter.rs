//! Read pacing.
//!
//! Each read of `L` bytes at `R` bytes/s is spaced `L / R` after the
//! previous read completed. When the previous read completed long enough
//! ago, the full spacing is slept anyway: backlog is never caught up, so the
//! achieved rate never exceeds `R`.

use std::time::{Duration, Instant};

use crate::error::{Result, ThrottleError};

/// Paces reads to a byte rate.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    bytes_per_sec: u64,
    last_completion: Instant,
}

impl RateLimiter {
    /// Creates a limiter whose first read is paced from now.
    ///
    /// # Errors
    /// Returns [`ThrottleError::InvalidRate`] for a zero rate.
    pub fn new(bytes_per_sec: u64) -> Result<Self> {
        if bytes_per_sec == 0 {
            return Err(ThrottleError::InvalidRate(bytes_per_sec));
        }
        Ok(Self {
            bytes_per_sec,
            last_completion: Instant::now(),
        })
    }

    /// Configured rate.
    #[must_use]
    pub const fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec
    }

    /// Time one read of `len` bytes occupies at the configured rate.
    #[must_use]
    pub fn spacing(&self, len: u64) -> Duration {
        let nanos = u128::from(len) * 1_000_000_000 / u128::from(self.bytes_per_sec);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Sleep required before a read of `len` bytes starting at `now`.
    #[must_use]
    pub fn delay_for(&self, len: u64, now: Instant) -> Duration {
        let spacing = self.spacing(len);
        let elapsed = now.saturating_duration_since(self.last_completion);
        if elapsed < spacing {
            spacing - elapsed
        } else {
            spacing
        }
    }

    /// Records that a read finished at `at`.
    pub fn record_completion(&mut self, at: Instant) {
        self.last_completion = at;
    }

    /// Sleeps the pacing delay, runs `read`, and records its completion.
    ///
    /// Blocks the calling thread.
    pub fn throttle<T>(&mut self, len: u64, read: impl FnOnce() -> T) -> T {
        let delay = self.delay_for(len, Instant::now());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let out = read();
        self.record_completion(Instant::now());
        out
    }
}
