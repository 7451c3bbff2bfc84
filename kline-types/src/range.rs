//! Time ranges, pagination cursors, and direction.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::KlineError;
use crate::market::Timeframe;

/// Half-open range `[start, end)` of record timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub start: DateTime<Utc>,
    /// Exclusive upper bound.
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range, rejecting `end < start`.
    ///
    /// # Errors
    /// Returns `KlineError::InvalidArg` when `end` precedes `start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, KlineError> {
        if end < start {
            return Err(KlineError::InvalidArg(format!(
                "range end {end} precedes start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// True when no instant lies inside the range.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Whether `ts` lies inside `[start, end)`.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    /// Snap the range onto the grid of `tf`: the start rounds up to the first bar
    /// opening inside the range, the end rounds up so a partially covered bar
    /// opening before `end` stays included.
    #[must_use]
    pub fn aligned(self, tf: Timeframe) -> Self {
        Self {
            start: tf.align_up(self.start),
            end: tf.align_up(self.end),
        }
    }

    /// Range with the end clamped to `limit` (never before `start`).
    #[must_use]
    pub fn clamp_end(self, limit: DateTime<Utc>) -> Self {
        Self {
            start: self.start,
            end: self.end.min(limit).max(self.start),
        }
    }

    /// Number of grid slots of `tf` in the range.
    #[must_use]
    pub fn expected_len(&self, tf: Timeframe) -> i64 {
        tf.steps_between(self.start, self.end)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Pagination position. Opaque to everything except the adapter that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Cursor {
    /// Timestamp-window pagination: the next window edge.
    Time(DateTime<Utc>),
    /// Cursor-token pagination: a server-issued continuation token.
    Token(String),
}

impl Cursor {
    /// Timestamp carried by a `Time` cursor.
    #[must_use]
    pub const fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Time(ts) => Some(*ts),
            Self::Token(_) => None,
        }
    }

    /// Token carried by a `Token` cursor.
    #[must_use]
    pub fn as_token(&self) -> Option<&str> {
        match self {
            Self::Token(t) => Some(t.as_str()),
            Self::Time(_) => None,
        }
    }
}

/// Direction a pagination walk moves through time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Oldest first: cursors increase.
    #[default]
    Forward,
    /// Newest first: cursors decrease.
    Backward,
}
