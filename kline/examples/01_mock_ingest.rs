use std::sync::Arc;

use chrono::{TimeZone, Utc};
use kline::{
    DataKind, Exchange, Ingestor, JobRequest, MarketType, SeriesKey, TimeRange, Timeframe,
};
use kline_mock::{MemoryJobStore, MemoryStore, MockAdapter, MockBehavior};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kline=debug")),
        )
        .init();

    let adapter = MockAdapter::new(Exchange::Okx).with_page_size(100);
    let ctl = adapter.controller();
    // The second page answers with a rate-limit signal first.
    ctl.push([
        MockBehavior::Serve,
        MockBehavior::Fail(kline::KlineError::rate_limited("okx", Some(1_000))),
    ])
    .await;

    let store = Arc::new(MemoryStore::new());
    let ingestor = Ingestor::builder()
        .with_adapter(Arc::new(adapter))
        .storage(store.clone())
        .job_store(Arc::new(MemoryJobStore::new()))
        .build()?;

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().ok_or("bad date")?;
    let end = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).single().ok_or("bad date")?;
    let request = JobRequest::candles(
        Exchange::Okx,
        "BTC-USDT-SWAP",
        MarketType::Futures,
        Timeframe::H4,
        TimeRange::new(start, end)?,
    );
    let id = ingestor.submit(request).await?;
    let job = ingestor.wait(id).await?;

    println!(
        "{id}: {:?} after {} pages, {} records",
        job.state, job.pages_fetched, job.records_persisted
    );
    let key = SeriesKey::new(Exchange::Okx, "BTC-USDT-SWAP", MarketType::Futures, Timeframe::H4);
    let series = store.snapshot(&key, DataKind::Candles).await;
    if let (Some(first), Some(last)) = (series.first(), series.last()) {
        println!(
            "stored {} bars from {} to {}",
            series.len(),
            first.timestamp(),
            last.timestamp()
        );
    }
    Ok(())
}
