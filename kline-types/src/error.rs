use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for the kline workspace.
///
/// Adapter-level classes (`RateLimited`, `Transient`, `Malformed`) are produced by
/// exchange adapters; the pagination driver resolves the retryable ones and only
/// surfaces terminal outcomes to the orchestrator as job failures.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum KlineError {
    /// The exchange asked us to slow down; retry after the hint (when supplied).
    #[error("rate limited by {exchange} (retry_after_ms={retry_after_ms:?})")]
    RateLimited {
        /// Exchange that signalled the limit.
        exchange: String,
        /// Server-provided retry hint in milliseconds.
        retry_after_ms: Option<u64>,
    },

    /// Network failure, timeout, or 5xx; retryable with backoff.
    #[error("transient failure from {exchange}: {msg}")]
    Transient {
        /// Exchange that failed.
        exchange: String,
        /// Human-readable error message.
        msg: String,
    },

    /// Response shape was not what the adapter expects; never retried.
    #[error("malformed response from {exchange}: {msg}")]
    Malformed {
        /// Exchange that produced the response.
        exchange: String,
        /// Human-readable error message.
        msg: String,
    },

    /// Transient failures exhausted the retry budget.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last error observed.
        last: Box<KlineError>,
    },

    /// The job was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,

    /// The job was replaced by a resumed job during recovery.
    #[error("superseded by job {replacement}")]
    Superseded {
        /// Identifier of the job that continues the work.
        replacement: u64,
    },

    /// Missing intervals survived every backfill round.
    #[error("{count} gap(s) remain after backfill")]
    UnresolvedGaps {
        /// Number of remaining gaps.
        count: usize,
    },

    /// Invalid records survived every backfill round.
    #[error("{count} unresolved conflict(s)")]
    UnresolvedConflicts {
        /// Number of unresolved conflicts.
        count: usize,
    },

    /// The requested capability is not offered by the adapter.
    #[error("unsupported capability: {capability}")]
    Unsupported {
        /// Capability string, e.g. `okx/open-interest`.
        capability: String,
    },

    /// Invalid input argument.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// A job or resource could not be found.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing resource.
        what: String,
    },

    /// The storage collaborator failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl KlineError {
    /// Helper: build a `RateLimited` error.
    pub fn rate_limited(exchange: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        Self::RateLimited {
            exchange: exchange.into(),
            retry_after_ms,
        }
    }

    /// Helper: build a `Transient` error.
    pub fn transient(exchange: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transient {
            exchange: exchange.into(),
            msg: msg.into(),
        }
    }

    /// Helper: build a `Malformed` error.
    pub fn malformed(exchange: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Malformed {
            exchange: exchange.into(),
            msg: msg.into(),
        }
    }

    /// Helper: build an `Unsupported` error for a capability string.
    #[must_use]
    pub fn unsupported(cap: impl Into<String>) -> Self {
        Self::Unsupported {
            capability: cap.into(),
        }
    }

    /// Helper: build a `NotFound` error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Whether the pagination driver may retry the failed call.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient { .. })
    }

    /// Server retry hint, when this is a `RateLimited` error carrying one.
    #[must_use]
    pub const fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}
