//! kline-specific data transfer objects and configuration primitives.
#![warn(missing_docs)]

mod capability;
/// Resolved configuration structs.
pub mod config;
mod error;
/// Fetch jobs and data-quality findings.
pub mod job;
/// Exchanges, markets, and the timeframe grid.
pub mod market;
mod range;
/// Canonical records.
pub mod record;

pub use capability::{AdapterCapabilities, EndpointClass, KindCapability, PaginationStyle};
pub use config::{ExchangeConfig, IngestConfig, RateLimitConfig, RetryConfig};
pub use error::KlineError;
pub use job::{
    Conflict, ConflictKind, Failure, FetchJob, Gap, JobEvent, JobId, JobRequest, JobState,
};
pub use market::{DataKind, Exchange, MarketType, Timeframe, TimeframeSet};
pub use range::{Cursor, Direction, TimeRange};
pub use record::{Candle, OpenInterestPoint, Record, SeriesKey};
