//! Sliding-window log limiter with cooldown and penalty spacing.
//!
//! The window state lives behind a `std::sync::Mutex` that is only held for the
//! admission decision itself; all waiting happens on `tokio::time::sleep` outside it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kline_types::{EndpointClass, Exchange, RateLimitConfig};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Pure admission state: a log of grant instants plus cooldown bookkeeping.
///
/// Exposed so the admission discipline can be exercised without a runtime.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    grants: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
    penalty_until: Option<Instant>,
}

impl SlidingWindow {
    /// Empty window admitting `limit` grants per `window`.
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        let limit = usize::try_from(limit.max(1)).unwrap_or(usize::MAX);
        Self {
            limit,
            window,
            grants: VecDeque::with_capacity(limit.min(1024)),
            cooldown_until: None,
            penalty_until: None,
        }
    }

    /// Even spacing enforced during a penalty period.
    #[must_use]
    pub fn spacing(&self) -> Duration {
        let n = u32::try_from(self.limit).unwrap_or(u32::MAX);
        self.window / n
    }

    /// Try to record a grant at `now`.
    ///
    /// # Errors
    /// Returns how long to wait before capacity may exist again.
    pub fn try_acquire_at(&mut self, now: Instant) -> Result<(), Duration> {
        if let Some(until) = self.cooldown_until {
            if now < until {
                return Err(until - now);
            }
            self.cooldown_until = None;
        }

        while let Some(&oldest) = self.grants.front() {
            if oldest + self.window <= now {
                self.grants.pop_front();
            } else {
                break;
            }
        }

        if self.penalty_until.is_some_and(|until| now < until) {
            if let Some(&last) = self.grants.back() {
                let earliest = last + self.spacing();
                if now < earliest {
                    return Err(earliest - now);
                }
            }
        }

        if self.grants.len() >= self.limit {
            let oldest = self.grants.front().copied().unwrap_or(now);
            return Err((oldest + self.window).saturating_duration_since(now));
        }

        self.grants.push_back(now);
        Ok(())
    }

    /// Block grants until `now + cooldown`, then space them evenly until
    /// `penalty` has elapsed on top of that.
    pub fn signal_at(&mut self, now: Instant, cooldown: Duration, penalty: Duration) {
        let until = now + cooldown;
        self.cooldown_until = Some(self.cooldown_until.map_or(until, |u| u.max(until)));
        let penalty_end = until + penalty;
        self.penalty_until = Some(self.penalty_until.map_or(penalty_end, |p| p.max(penalty_end)));
    }

    /// Grants currently inside the window ending at `now`.
    #[must_use]
    pub fn in_window(&self, now: Instant) -> usize {
        self.grants.iter().filter(|g| **g + self.window > now).count()
    }
}

/// Evidence that a request was admitted. Dropping it frees any in-flight slot.
#[derive(Debug)]
pub struct Permit {
    _slot: Option<OwnedSemaphorePermit>,
    granted_at: Instant,
}

impl Permit {
    /// Instant the window admitted the request.
    #[must_use]
    pub const fn granted_at(&self) -> Instant {
        self.granted_at
    }
}

/// Throttle for one `(exchange, endpoint-class)` budget.
#[derive(Debug)]
pub struct RateLimiter {
    exchange: Exchange,
    class: EndpointClass,
    config: RateLimitConfig,
    state: Mutex<SlidingWindow>,
    in_flight: Option<Arc<Semaphore>>,
}

impl RateLimiter {
    /// Build a limiter from resolved configuration.
    #[must_use]
    pub fn new(exchange: Exchange, class: EndpointClass, config: RateLimitConfig) -> Self {
        let in_flight = config
            .max_in_flight
            .map(|n| Arc::new(Semaphore::new(usize::try_from(n.max(1)).unwrap_or(1))));
        Self {
            exchange,
            class,
            state: Mutex::new(SlidingWindow::new(config.limit, config.window)),
            config,
            in_flight,
        }
    }

    /// Exchange this budget belongs to.
    #[must_use]
    pub const fn exchange(&self) -> Exchange {
        self.exchange
    }

    /// Endpoint class this budget covers.
    #[must_use]
    pub const fn class(&self) -> EndpointClass {
        self.class
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, SlidingWindow> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until the window has capacity, then take a grant.
    ///
    /// Never spins: each failed admission sleeps for exactly the reported delay.
    /// The future is cancel-safe; dropping it before completion takes no grant.
    pub async fn acquire(&self) -> Permit {
        let slot = match &self.in_flight {
            Some(sem) => Arc::clone(sem).acquire_owned().await.ok(),
            None => None,
        };
        loop {
            let now = Instant::now();
            let decision = self.lock().try_acquire_at(now);
            match decision {
                Ok(()) => {
                    return Permit {
                        _slot: slot,
                        granted_at: now,
                    };
                }
                Err(wait) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(
                        target = "kline::rate_limit",
                        exchange = %self.exchange,
                        class = %self.class,
                        wait_ms = wait.as_millis(),
                        "waiting for rate-limit capacity"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Return a permit. Equivalent to dropping it.
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    /// React to a server rate-limit signal: no grants for `retry_after`
    /// (or the configured default cooldown), then evenly spaced grants for the
    /// configured penalty period.
    pub fn on_rate_limit_signal(&self, retry_after: Option<Duration>) {
        let cooldown = retry_after.unwrap_or(self.config.default_cooldown);
        #[cfg(feature = "tracing")]
        tracing::warn!(
            target = "kline::rate_limit",
            exchange = %self.exchange,
            class = %self.class,
            cooldown_ms = cooldown.as_millis(),
            "rate limit signalled; cooling down"
        );
        self.lock()
            .signal_at(Instant::now(), cooldown, self.config.penalty);
    }

    /// Grants inside the current window.
    #[must_use]
    pub fn in_window(&self) -> usize {
        self.lock().in_window(Instant::now())
    }
}
