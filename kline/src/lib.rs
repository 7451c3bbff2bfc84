//! kline ingests historical candles and open interest from crypto exchanges into a
//! storage backend of your choice, with verified completeness.
//!
//! Overview
//! - Each submitted job walks its range page by page through the exchange adapter,
//!   admitted by a shared sliding-window rate limiter per `(exchange, endpoint-class)`.
//! - Every page is validated before it is persisted: off-grid timestamps and OHLC
//!   violations hold the page back; differing duplicates resolve to the most recent fetch.
//! - After the walk, gaps over the whole range spawn backfill child jobs. Gaps or
//!   conflicts that survive backfill fail the job with the last covered timestamp.
//! - Jobs are snapshotted to an optional job store so interrupted work can resume.
//!
//! Key behaviors
//! - `RateLimited` responses suspend the job for the exchange's hint and retry the same
//!   cursor; they never consume the retry budget.
//! - `Transient` failures and call timeouts back off exponentially with jitter until
//!   `max_attempts`; `Malformed` responses abort at once.
//! - Ranges are half-open and snapped to the timeframe grid; by default the end is
//!   clamped so the still-forming bar is never requested.
//!
//! Example
//! ```rust,ignore
//! use std::sync::Arc;
//! use kline::{Ingestor, JobRequest, Exchange, MarketType, Timeframe, TimeRange};
//!
//! let ingestor = Ingestor::builder()
//!     .with_adapter(Arc::new(kline_exchanges::BinanceAdapter::production()?))
//!     .storage(Arc::new(my_store))
//!     .build()?;
//! let id = ingestor
//!     .submit(JobRequest::candles(
//!         Exchange::Binance,
//!         "BTCUSDT",
//!         MarketType::Spot,
//!         Timeframe::H1,
//!         TimeRange::new(start, end)?,
//!     ))
//!     .await?;
//! let job = ingestor.wait(id).await?;
//! ```
#![warn(missing_docs)]

mod backoff;
mod core;
/// Pagination driver stepping one job through its range.
pub mod driver;
mod table;
mod worker;

pub use crate::backoff::{Backoff, jitter_wait};
pub use crate::core::{Ingestor, IngestorBuilder};
pub use crate::driver::{DrivenPage, DriverState, PaginationDriver};
pub use kline_core::*;
pub use kline_middleware::{RateLimiter, RateLimiterRegistry, ThrottledAdapter};
