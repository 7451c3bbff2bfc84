//! Fetch jobs, data-quality findings, and the job state machine.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::KlineError;
use crate::market::{DataKind, Exchange, MarketType, Timeframe};
use crate::range::{Cursor, Direction, TimeRange};
use crate::record::SeriesKey;

/// Identifier of a fetch job, unique within one orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Lifecycle of a fetch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    /// Accepted, not yet started.
    Pending,
    /// Pages are being fetched or backfill children are running.
    InProgress,
    /// The whole range is persisted with no gaps or unresolved conflicts.
    Completed,
    /// Terminal failure; see [`FetchJob::failure`].
    Failed,
}

impl JobState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// What a caller asks the orchestrator to ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Series to ingest.
    pub key: SeriesKey,
    /// Candles or open interest.
    pub kind: DataKind,
    /// Requested `[start, end)`.
    pub range: TimeRange,
}

impl JobRequest {
    /// Request OHLCV candles.
    pub fn candles(
        exchange: Exchange,
        symbol: impl AsRef<str>,
        market_type: MarketType,
        timeframe: Timeframe,
        range: TimeRange,
    ) -> Self {
        Self {
            key: SeriesKey::new(exchange, symbol, market_type, timeframe),
            kind: DataKind::Candles,
            range,
        }
    }

    /// Request open-interest snapshots.
    pub fn open_interest(
        exchange: Exchange,
        symbol: impl AsRef<str>,
        market_type: MarketType,
        timeframe: Timeframe,
        range: TimeRange,
    ) -> Self {
        Self {
            key: SeriesKey::new(exchange, symbol, market_type, timeframe),
            kind: DataKind::OpenInterest,
            range,
        }
    }
}

/// A run of missing grid slots `[start, end)` in one series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gap {
    /// Series with the hole.
    pub key: SeriesKey,
    /// Kind of series.
    pub kind: DataKind,
    /// First missing slot.
    pub start: DateTime<Utc>,
    /// First present slot after the hole (or the range end).
    pub end: DateTime<Utc>,
}

impl Gap {
    /// Missing interval as a range.
    #[must_use]
    pub const fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end,
        }
    }

    /// Number of missing grid slots.
    #[must_use]
    pub fn missing(&self) -> i64 {
        self.key.timeframe.steps_between(self.start, self.end)
    }
}

/// Classification of a data-quality conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// The same natural key was fetched twice with different values.
    DuplicateMismatch,
    /// A candle violates the OHLC envelope (or carries a negative quantity).
    Invariant,
    /// The timestamp is off the timeframe grid.
    Misaligned,
}

/// A data-quality anomaly. Conflicts never abort a job on their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Series with the anomaly.
    pub key: SeriesKey,
    /// Kind of series.
    pub kind: DataKind,
    /// Timestamp of the offending record.
    pub timestamp: DateTime<Utc>,
    /// Classification.
    pub class: ConflictKind,
    /// Human-readable description.
    pub detail: String,
    /// Whether policy already picked a winner.
    pub resolved: bool,
}

/// Terminal failure with enough context to resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Most specific known reason.
    pub reason: KlineError,
    /// Last timestamp durably persisted in the job's walk direction.
    pub last_covered: Option<DateTime<Utc>>,
}

/// Inputs to the job state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A worker picked the job up.
    Started,
    /// A page batch was persisted (possibly empty) and the cursor advanced.
    PageCommitted {
        /// Cursor for the next page, if any.
        next_cursor: Option<Cursor>,
        /// Records written by this batch.
        persisted: usize,
        /// Furthest timestamp written by this batch in the walk direction.
        covered: Option<DateTime<Utc>>,
    },
    /// Conflicts found while validating a batch or the whole series.
    ConflictsObserved(Vec<Conflict>),
    /// Unresolved conflicts at these timestamps were cleared by a clean refetch.
    ConflictsResolved(Vec<DateTime<Utc>>),
    /// The current set of open gaps (replaces the previous set).
    GapsDetected(Vec<Gap>),
    /// A backfill child job was registered.
    ChildSpawned(JobId),
    /// All pages and children finished cleanly.
    Completed,
    /// Terminal failure.
    Failed(KlineError),
}

/// Snapshot of one fetch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchJob {
    /// Identifier.
    pub id: JobId,
    /// Parent job when this is a backfill child.
    pub parent: Option<JobId>,
    /// What is being ingested. Gaps are detected and backfilled over `request.range`.
    pub request: JobRequest,
    /// Part of the range the page walk covers when it is narrower than the request,
    /// as for jobs resumed by recovery.
    #[serde(default)]
    pub walk: Option<TimeRange>,
    /// Pagination position for the next page.
    pub cursor: Option<Cursor>,
    /// Walk direction chosen from the adapter's native direction.
    pub direction: Direction,
    /// Lifecycle state.
    pub state: JobState,
    /// Backfill children, in spawn order.
    pub children: Vec<JobId>,
    /// Pages fetched and committed.
    pub pages_fetched: u32,
    /// Records handed to storage.
    pub records_persisted: u64,
    /// Furthest timestamp persisted in the walk direction.
    pub last_covered: Option<DateTime<Utc>>,
    /// Conflicts observed so far.
    pub conflicts: Vec<Conflict>,
    /// Gaps still open.
    pub gaps: Vec<Gap>,
    /// Failure details when `state == Failed`.
    pub failure: Option<Failure>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last transition instant.
    pub updated_at: DateTime<Utc>,
}

impl FetchJob {
    /// A fresh pending job.
    #[must_use]
    pub fn new(
        id: JobId,
        parent: Option<JobId>,
        request: JobRequest,
        direction: Direction,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            parent,
            request,
            walk: None,
            cursor: None,
            direction,
            state: JobState::Pending,
            children: Vec::new(),
            pages_fetched: 0,
            records_persisted: 0,
            last_covered: None,
            conflicts: Vec::new(),
            gaps: Vec::new(),
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply one event.
    ///
    /// # Errors
    /// Returns `KlineError::InvalidArg` for transitions the state machine forbids:
    /// anything after a terminal state, page events before `Started`, and
    /// `Completed` while gaps remain open.
    pub fn apply(&mut self, event: JobEvent, now: DateTime<Utc>) -> Result<(), KlineError> {
        let next = match (self.state, event) {
            (JobState::Pending, JobEvent::Started) => JobState::InProgress,
            (
                JobState::InProgress,
                JobEvent::PageCommitted {
                    next_cursor,
                    persisted,
                    covered,
                },
            ) => {
                self.cursor = next_cursor;
                self.pages_fetched = self.pages_fetched.saturating_add(1);
                self.records_persisted = self.records_persisted.saturating_add(persisted as u64);
                if let Some(ts) = covered {
                    self.last_covered = Some(match (self.direction, self.last_covered) {
                        (Direction::Forward, Some(prev)) => prev.max(ts),
                        (Direction::Backward, Some(prev)) => prev.min(ts),
                        (_, None) => ts,
                    });
                }
                JobState::InProgress
            }
            (JobState::InProgress, JobEvent::ConflictsObserved(found)) => {
                self.conflicts.extend(found);
                JobState::InProgress
            }
            (JobState::InProgress, JobEvent::ConflictsResolved(stamps)) => {
                for c in &mut self.conflicts {
                    if !c.resolved && stamps.contains(&c.timestamp) {
                        c.resolved = true;
                    }
                }
                JobState::InProgress
            }
            (JobState::InProgress, JobEvent::GapsDetected(gaps)) => {
                self.gaps = gaps;
                JobState::InProgress
            }
            (JobState::InProgress, JobEvent::ChildSpawned(child)) => {
                self.children.push(child);
                JobState::InProgress
            }
            (JobState::InProgress, JobEvent::Completed) => {
                if !self.gaps.is_empty() {
                    return Err(KlineError::InvalidArg(format!(
                        "{} cannot complete with {} open gap(s)",
                        self.id,
                        self.gaps.len()
                    )));
                }
                JobState::Completed
            }
            (JobState::Pending | JobState::InProgress, JobEvent::Failed(reason)) => {
                self.failure = Some(Failure {
                    reason,
                    last_covered: self.last_covered,
                });
                JobState::Failed
            }
            (state, event) => {
                return Err(KlineError::InvalidArg(format!(
                    "{}: event {event:?} not allowed in state {state:?}",
                    self.id
                )));
            }
        };
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    /// Restrict the page walk to `walk`; gap checks still cover the whole request.
    #[must_use]
    pub fn with_walk(mut self, walk: TimeRange) -> Self {
        self.walk = Some(walk);
        self
    }

    /// Range the page walk covers.
    #[must_use]
    pub fn walk_range(&self) -> TimeRange {
        self.walk.unwrap_or(self.request.range)
    }

    /// Unresolved conflicts recorded on this job.
    pub fn unresolved_conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| !c.resolved)
    }

    /// Part of the walk still to page through when resuming from the last covered
    /// timestamp.
    ///
    /// Slots before that point may still be missing (withheld pages, open gaps); a
    /// resumed job finds them by checking the whole request range.
    #[must_use]
    pub fn remaining_range(&self) -> TimeRange {
        let range = self.walk_range();
        let Some(covered) = self.last_covered else {
            return range;
        };
        match self.direction {
            Direction::Forward => TimeRange {
                start: (covered + self.request.key.timeframe.step()).max(range.start),
                end: range.end,
            }
            .clamp_end(range.end),
            Direction::Backward => TimeRange {
                start: range.start,
                end: covered.min(range.end),
            }
            .clamp_end(range.end),
        }
    }
}
