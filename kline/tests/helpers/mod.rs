// Shared fixtures for orchestrator tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use kline::{
    DataKind, Exchange, Ingestor, IngestorBuilder, JobRequest, MarketType, Record, RetryConfig,
    SeriesKey, TimeRange, Timeframe,
};
use kline_mock::{MemoryJobStore, MemoryStore, MockAdapter, MockController, fixtures};

pub const SYMBOL: &str = "BTCUSDT";

/// Construct a UTC `DateTime` on 2024-01-01 at `h:00`.
pub fn at(h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
}

/// `[2024-01-01T00:00Z, 2024-01-02T00:00Z)`.
pub fn day() -> TimeRange {
    TimeRange::new(at(0), at(0) + chrono::TimeDelta::days(1)).unwrap()
}

pub fn key() -> SeriesKey {
    SeriesKey::new(Exchange::Binance, SYMBOL, MarketType::Spot, Timeframe::H1)
}

pub fn hourly(range: TimeRange) -> JobRequest {
    JobRequest::candles(Exchange::Binance, SYMBOL, MarketType::Spot, Timeframe::H1, range)
}

/// Retry quickly so paused-clock tests stay short.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        min_backoff_ms: 100,
        max_backoff_ms: 1_000,
        factor: 2,
        jitter_percent: 0,
        max_attempts,
    }
}

pub struct Harness {
    pub ingestor: Ingestor,
    pub ctl: MockController,
    pub store: Arc<MemoryStore>,
    pub jobs: Arc<MemoryJobStore>,
}

/// Mock Binance adapter with `page_size` bars per page over fresh in-memory stores.
pub fn harness(page_size: u32) -> Harness {
    harness_with(MockAdapter::new(Exchange::Binance).with_page_size(page_size), |b| b)
}

pub fn harness_with(
    adapter: MockAdapter,
    configure: impl FnOnce(IngestorBuilder) -> IngestorBuilder,
) -> Harness {
    let ctl = adapter.controller();
    let store = Arc::new(MemoryStore::new());
    let jobs = Arc::new(MemoryJobStore::new());
    let builder = Ingestor::builder()
        .with_adapter(Arc::new(adapter))
        .storage(store.clone())
        .job_store(jobs.clone())
        .retry(fast_retry(5))
        .call_timeout(Duration::from_secs(5));
    let ingestor = configure(builder).build().unwrap();
    Harness {
        ingestor,
        ctl,
        store,
        jobs,
    }
}

/// Assert `records` cover `range` one bar per step, ascending.
pub fn assert_contiguous(records: &[Record], range: TimeRange) {
    let step = records
        .first()
        .map_or(Timeframe::H1, Record::timeframe)
        .step();
    assert_eq!(records.first().map(Record::timestamp), Some(range.start));
    assert_eq!(records.last().map(|r| r.timestamp() + step), Some(range.end));
    for pair in records.windows(2) {
        assert_eq!(pair[1].timestamp() - pair[0].timestamp(), step);
    }
}

/// The series an uninterrupted, conflict-free run should persist.
pub fn expected(range: TimeRange) -> Vec<Record> {
    fixtures::series(&key(), DataKind::Candles, range)
}
