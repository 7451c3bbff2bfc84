//! Page-by-page walk through one job's range.

use std::sync::Arc;
use std::time::Duration;

use kline_core::{
    Cursor, Direction, ExchangeAdapter, IngestConfig, JobRequest, KlineError, PageRequest,
    Record, TimeRange, truncate_to_range,
};
use tokio::sync::watch;

use crate::backoff::Backoff;

/// Where a pagination walk stands between calls to [`PaginationDriver::next_page`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    /// Ready to request the page at `cursor` (`None` means the range edge).
    Ready {
        /// Position of the next request.
        cursor: Option<Cursor>,
    },
    /// The exchange signalled a rate limit; the same cursor is retried after `wait`.
    Suspended {
        /// Position to retry.
        cursor: Option<Cursor>,
        /// Hint from the exchange, or the configured cooldown.
        wait: Duration,
    },
    /// A transient failure is being retried after `wait`.
    BackingOff {
        /// Position to retry.
        cursor: Option<Cursor>,
        /// Consecutive transient failures for this page.
        failures: u32,
        /// Backoff delay before the next attempt.
        wait: Duration,
    },
    /// No pages remain.
    Finished,
}

/// One page accepted by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrivenPage {
    /// 1-based page number within this walk.
    pub number: u32,
    /// Records inside the job range, in the order the adapter returned them.
    pub records: Vec<Record>,
    /// Cursor for the following page; `None` on the last page.
    pub next_cursor: Option<Cursor>,
}

impl DrivenPage {
    /// Whether this page ended the walk.
    #[must_use]
    pub const fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Drives repeated adapter calls through a range using the adapter's cursor semantics.
///
/// - `RateLimited` suspends for the hint (or the configured cooldown) and retries the
///   same cursor, without limit.
/// - `Transient` retries with exponential backoff until `max_attempts` is reached,
///   then fails with `RetriesExhausted`.
/// - Every other error aborts the walk.
///
/// Every wait observes the cancellation flag.
pub struct PaginationDriver {
    adapter: Arc<dyn ExchangeAdapter>,
    request: JobRequest,
    direction: Direction,
    state: DriverState,
    backoff: Backoff,
    cooldown: Duration,
    cancel: watch::Receiver<bool>,
    pages: u32,
}

impl PaginationDriver {
    /// Start a walk over `request.range` from `cursor` (or from the range edge).
    #[must_use]
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        request: JobRequest,
        direction: Direction,
        cursor: Option<Cursor>,
        cfg: &IngestConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let state = if request.range.is_empty() {
            DriverState::Finished
        } else {
            DriverState::Ready { cursor }
        };
        Self {
            adapter,
            request,
            direction,
            state,
            backoff: Backoff::new(cfg.retry),
            cooldown: cfg.rate_limit_cooldown,
            cancel,
            pages: 0,
        }
    }

    /// Current position.
    #[must_use]
    pub const fn state(&self) -> &DriverState {
        &self.state
    }

    /// Pages accepted so far.
    #[must_use]
    pub const fn pages(&self) -> u32 {
        self.pages
    }

    /// Step until the next page is accepted.
    ///
    /// Returns `Ok(None)` once the walk is finished.
    ///
    /// # Errors
    /// `Cancelled` when the cancellation flag is raised, `RetriesExhausted` when
    /// transient failures use up the retry budget, `Malformed` when the adapter's
    /// cursor does not advance, and any non-retryable adapter error.
    pub async fn next_page(&mut self) -> Result<Option<DrivenPage>, KlineError> {
        loop {
            match std::mem::replace(&mut self.state, DriverState::Finished) {
                DriverState::Finished => return Ok(None),
                DriverState::Suspended { cursor, wait }
                | DriverState::BackingOff { cursor, wait, .. } => {
                    self.pause(wait).await?;
                    self.state = DriverState::Ready { cursor };
                }
                DriverState::Ready { cursor } => {
                    if *self.cancel.borrow() {
                        return Err(KlineError::Cancelled);
                    }
                    let req = PageRequest {
                        key: self.request.key.clone(),
                        kind: self.request.kind,
                        range: self.request.range,
                        cursor: cursor.clone(),
                        direction: self.direction,
                    };
                    let outcome = tokio::select! {
                        biased;
                        () = cancelled(&mut self.cancel) => return Err(KlineError::Cancelled),
                        r = self.adapter.fetch_page(&req) => r,
                    };
                    match outcome {
                        Ok(page) => {
                            self.backoff.reset();
                            return self
                                .accept(cursor, page.records, page.next_cursor, page.has_more)
                                .map(Some);
                        }
                        Err(KlineError::RateLimited { retry_after_ms, .. }) => {
                            let wait = retry_after_ms.map_or(self.cooldown, Duration::from_millis);
                            #[cfg(feature = "tracing")]
                            tracing::warn!(
                                target = "kline::driver",
                                series = %self.request.key,
                                page = self.pages + 1,
                                retry_after_ms = ?retry_after_ms,
                                wait_ms = wait.as_millis(),
                                "rate limited; suspending"
                            );
                            self.state = DriverState::Suspended { cursor, wait };
                        }
                        Err(err @ KlineError::Transient { .. }) => {
                            let Some(wait) = self.backoff.on_failure() else {
                                return Err(KlineError::RetriesExhausted {
                                    attempts: self.backoff.failures(),
                                    last: Box::new(err),
                                });
                            };
                            #[cfg(feature = "tracing")]
                            tracing::debug!(
                                target = "kline::driver",
                                series = %self.request.key,
                                page = self.pages + 1,
                                failures = self.backoff.failures(),
                                wait_ms = wait.as_millis(),
                                error = %err,
                                "transient failure; backing off"
                            );
                            self.state = DriverState::BackingOff {
                                cursor,
                                failures: self.backoff.failures(),
                                wait,
                            };
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    fn accept(
        &mut self,
        cursor: Option<Cursor>,
        records: Vec<Record>,
        next_cursor: Option<Cursor>,
        has_more: bool,
    ) -> Result<DrivenPage, KlineError> {
        let range = self.request.range;
        let passed = records.iter().any(|r| past_edge(range, self.direction, r));
        let (records, _) = truncate_to_range(records, range);
        let next = if has_more && !passed { next_cursor } else { None };

        if let Some(next) = &next {
            let current = cursor.unwrap_or_else(|| self.range_edge());
            if !advances(self.direction, &current, next) {
                return Err(KlineError::malformed(
                    self.request.key.exchange.to_string(),
                    format!("cursor did not advance past {current:?} (got {next:?})"),
                ));
            }
        }

        self.pages += 1;
        self.state = match &next {
            Some(c) => DriverState::Ready {
                cursor: Some(c.clone()),
            },
            None => DriverState::Finished,
        };
        #[cfg(feature = "tracing")]
        tracing::debug!(
            target = "kline::driver",
            series = %self.request.key,
            page = self.pages,
            records = records.len(),
            last = next.is_none(),
            "page accepted"
        );
        Ok(DrivenPage {
            number: self.pages,
            records,
            next_cursor: next,
        })
    }

    fn range_edge(&self) -> Cursor {
        match self.direction {
            Direction::Forward => Cursor::Time(self.request.range.start),
            Direction::Backward => Cursor::Time(self.request.range.end),
        }
    }

    async fn pause(&mut self, wait: Duration) -> Result<(), KlineError> {
        tokio::select! {
            biased;
            () = cancelled(&mut self.cancel) => Err(KlineError::Cancelled),
            () = tokio::time::sleep(wait) => Ok(()),
        }
    }
}

fn past_edge(range: TimeRange, direction: Direction, record: &Record) -> bool {
    match direction {
        Direction::Forward => record.timestamp() >= range.end,
        Direction::Backward => record.timestamp() < range.start,
    }
}

fn advances(direction: Direction, current: &Cursor, next: &Cursor) -> bool {
    match (current, next) {
        (Cursor::Time(a), Cursor::Time(b)) => match direction {
            Direction::Forward => b > a,
            Direction::Backward => b < a,
        },
        (a, b) => a != b,
    }
}

/// Resolves once the flag is raised; never resolves when the sender is gone.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}
