use std::time::Duration;

use kline_core::RetryConfig;
use rand::Rng;

/// Add up to `jitter_percent` of `base_ms` as random jitter.
pub fn jitter_wait(base_ms: u64, jitter_percent: u32) -> u64 {
    let jitter_range = if jitter_percent == 0 {
        1
    } else {
        std::cmp::max(1, (base_ms.saturating_mul(u64::from(jitter_percent))) / 100)
    };
    let mut rng = rand::rng();
    base_ms.saturating_add(rng.random_range(0..jitter_range))
}

/// Exponential backoff over one page's transient failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    cfg: RetryConfig,
    failures: u32,
    current_ms: u64,
}

impl Backoff {
    /// Fresh schedule starting at `cfg.min_backoff_ms`.
    #[must_use]
    pub fn new(cfg: RetryConfig) -> Self {
        Self {
            cfg,
            failures: 0,
            current_ms: cfg.min_backoff_ms.min(cfg.max_backoff_ms),
        }
    }

    /// Failed attempts recorded since the last reset.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failed attempt.
    ///
    /// Returns the delay before the next attempt, or `None` once `max_attempts`
    /// attempts have failed. The base delay is capped at `max_backoff_ms`; jitter
    /// is added on top.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.cfg.max_attempts.max(1) {
            return None;
        }
        let base = self.current_ms;
        self.current_ms = base
            .saturating_mul(u64::from(self.cfg.factor.max(1)))
            .min(self.cfg.max_backoff_ms);
        Some(Duration::from_millis(jitter_wait(
            base,
            u32::from(self.cfg.jitter_percent),
        )))
    }

    /// Forget failures after a successful call.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.current_ms = self.cfg.min_backoff_ms.min(self.cfg.max_backoff_ms);
    }
}
