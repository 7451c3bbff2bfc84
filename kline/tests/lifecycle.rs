mod helpers;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use helpers::*;
use kline::{
    DataKind, Exchange, Ingestor, JobId, JobRequest, JobState, KlineError, MarketType, TimeRange,
    Timeframe, TimeframeSet,
};
use kline_mock::{MemoryStore, MockAdapter, MockBehavior};

#[tokio::test]
async fn unsupported_requests_are_rejected_at_submit() {
    let adapter = MockAdapter::new(Exchange::Coinbase)
        .with_candles(&[MarketType::Spot], TimeframeSet::H1 | TimeframeSet::D1)
        .without_open_interest();
    let h = harness_with(adapter, |b| b);

    let oi = JobRequest::open_interest(
        Exchange::Coinbase,
        "BTC-USD",
        MarketType::Spot,
        Timeframe::H1,
        day(),
    );
    let err = h.ingestor.submit(oi).await.unwrap_err();
    assert!(matches!(err, KlineError::Unsupported { .. }), "{err}");

    let futures = JobRequest::candles(
        Exchange::Coinbase,
        "BTC-USD",
        MarketType::Futures,
        Timeframe::H1,
        day(),
    );
    assert!(matches!(
        h.ingestor.submit(futures).await,
        Err(KlineError::Unsupported { .. })
    ));

    let weekly = JobRequest::candles(
        Exchange::Coinbase,
        "BTC-USD",
        MarketType::Spot,
        Timeframe::W1,
        day(),
    );
    assert!(matches!(
        h.ingestor.submit(weekly).await,
        Err(KlineError::Unsupported { .. })
    ));

    // No adapter registered for the exchange.
    let err = h.ingestor.submit(hourly(day())).await.unwrap_err();
    assert!(matches!(err, KlineError::Unsupported { .. }));

    assert!(h.ingestor.jobs().is_empty());
    assert_eq!(h.ctl.call_count().await, 0);
}

#[test]
fn builder_requires_adapter_and_storage() {
    let no_adapter = Ingestor::builder()
        .storage(Arc::new(MemoryStore::new()))
        .build();
    assert!(matches!(no_adapter, Err(KlineError::InvalidArg(_))));

    let no_storage = Ingestor::builder()
        .with_adapter(Arc::new(MockAdapter::new(Exchange::Okx)))
        .build();
    assert!(matches!(no_storage, Err(KlineError::InvalidArg(_))));

    let duplicate = Ingestor::builder()
        .with_adapter(Arc::new(MockAdapter::new(Exchange::Okx)))
        .with_adapter(Arc::new(MockAdapter::new(Exchange::Okx)))
        .storage(Arc::new(MemoryStore::new()))
        .build();
    assert!(matches!(duplicate, Err(KlineError::InvalidArg(_))));
}

#[tokio::test]
async fn ranges_snap_to_grid_and_exclude_forming_bar() {
    let h = harness(1_000);
    let now = Utc::now();
    let range = TimeRange::new(now - TimeDelta::hours(5), now + TimeDelta::hours(5)).unwrap();
    let id = h.ingestor.submit(hourly(range)).await.unwrap();
    let job = h.ingestor.wait(id).await.unwrap();
    assert_eq!(job.state, JobState::Completed, "{:?}", job.failure);

    let forming = Timeframe::H1.align_down(Utc::now());
    let r = job.request.range;
    assert!(Timeframe::H1.is_aligned(r.start));
    assert!(Timeframe::H1.is_aligned(r.end));
    assert!(r.start >= range.start);
    assert!(r.end <= forming);
    let stored = h.store.snapshot(&key(), DataKind::Candles).await;
    assert!(stored.iter().all(|c| c.timestamp() < forming));
}

#[tokio::test]
async fn ranges_without_closed_bars_are_invalid() {
    let h = harness(10);
    let now = Utc::now();
    let future = TimeRange::new(now + TimeDelta::hours(2), now + TimeDelta::hours(4)).unwrap();
    assert!(matches!(
        h.ingestor.submit(hourly(future)).await,
        Err(KlineError::InvalidArg(_))
    ));
    let empty = TimeRange::new(at(3), at(3)).unwrap();
    assert!(matches!(
        h.ingestor.submit(hourly(empty)).await,
        Err(KlineError::InvalidArg(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn malformed_response_aborts_without_retry() {
    let h = harness(10);
    h.ctl
        .push([
            MockBehavior::Serve,
            MockBehavior::Fail(KlineError::malformed("binance", "unexpected shape")),
        ])
        .await;
    let id = h.ingestor.submit(hourly(day())).await.unwrap();
    let job = h.ingestor.wait(id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    let failure = job.failure.unwrap();
    assert!(matches!(failure.reason, KlineError::Malformed { .. }));
    assert_eq!(failure.last_covered, Some(at(9)));
    assert_eq!(h.ctl.call_count().await, 2);
    assert_eq!(h.store.len().await, 10);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_back_off_then_succeed() {
    let h = harness(10);
    let flaky = MockBehavior::Fail(KlineError::transient("binance", "502"));
    h.ctl.push([flaky.clone(), flaky]).await;
    let id = h.ingestor.submit(hourly(day())).await.unwrap();
    let job = h.ingestor.wait(id).await.unwrap();
    assert_eq!(job.state, JobState::Completed, "{:?}", job.failure);

    let times = h.ctl.call_times().await;
    assert_eq!(times.len(), 5);
    assert!(times[1] - times[0] >= Duration::from_millis(100));
    assert!(times[2] - times[1] >= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_the_job() {
    let h = harness_with(MockAdapter::new(Exchange::Binance).with_page_size(10), |b| {
        b.retry(fast_retry(3))
    });
    let flaky = MockBehavior::Fail(KlineError::transient("binance", "connection reset"));
    h.ctl.push(std::iter::repeat_n(flaky, 5)).await;
    let id = h.ingestor.submit(hourly(day())).await.unwrap();
    let job = h.ingestor.wait(id).await.unwrap();
    let reason = job.failure.unwrap().reason;
    match reason {
        KlineError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, KlineError::Transient { .. }));
        }
        other => panic!("unexpected failure {other:?}"),
    }
    assert_eq!(h.ctl.call_count().await, 3);
}

#[tokio::test(start_paused = true)]
async fn hung_call_times_out_and_is_retried() {
    let h = harness(10);
    h.ctl.push([MockBehavior::Hang]).await;
    let id = h.ingestor.submit(hourly(day())).await.unwrap();
    let job = h.ingestor.wait(id).await.unwrap();
    assert_eq!(job.state, JobState::Completed, "{:?}", job.failure);
    let times = h.ctl.call_times().await;
    // 5 s call timeout plus the first backoff delay.
    assert!(times[1] - times[0] >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn stalled_cursor_is_malformed() {
    let h = harness(10);
    h.ctl.push([MockBehavior::Stall]).await;
    let id = h.ingestor.submit(hourly(day())).await.unwrap();
    let job = h.ingestor.wait(id).await.unwrap();
    assert!(matches!(
        job.failure.map(|f| f.reason),
        Some(KlineError::Malformed { .. })
    ));
    assert_eq!(h.ctl.call_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn storage_failure_fails_the_job() {
    let h = harness(10);
    h.store.fail_next_upserts(1).await;
    let id = h.ingestor.submit(hourly(day())).await.unwrap();
    let job = h.ingestor.wait(id).await.unwrap();
    assert!(matches!(
        job.failure.map(|f| f.reason),
        Some(KlineError::Storage(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn cancel_during_suspension_stops_the_job() {
    let h = harness(10);
    h.ctl
        .push([
            MockBehavior::Serve,
            MockBehavior::Fail(KlineError::rate_limited("binance", Some(600_000))),
        ])
        .await;
    let id = h.ingestor.submit(hourly(day())).await.unwrap();
    while h.ctl.call_count().await < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let job = h.ingestor.cancel(id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(
        job.failure.as_ref().map(|f| f.reason.clone()),
        Some(KlineError::Cancelled)
    );
    let waited = h.ingestor.wait(id).await.unwrap();
    assert_eq!(waited.state, JobState::Failed);

    tokio::time::sleep(Duration::from_secs(1_200)).await;
    assert_eq!(h.ctl.call_count().await, 2);
    assert_eq!(h.store.len().await, 10);
    assert_eq!(
        h.jobs.get(id).await.map(|j| j.state),
        Some(JobState::Failed)
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_discards_in_flight_page() {
    let h = harness(10);
    h.ctl.push([MockBehavior::Serve, MockBehavior::Hang]).await;
    let id = h.ingestor.submit(hourly(day())).await.unwrap();
    while h.ctl.call_count().await < 2 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    h.ingestor.cancel(id).await.unwrap();
    let job = h.ingestor.wait(id).await.unwrap();
    assert_eq!(job.pages_fetched, 1);
    assert_eq!(h.store.len().await, 10);
}

#[tokio::test(start_paused = true)]
async fn cancelling_a_finished_job_changes_nothing() {
    let h = harness(10);
    let id = h.ingestor.submit(hourly(day())).await.unwrap();
    h.ingestor.wait(id).await.unwrap();
    let job = h.ingestor.cancel(id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
}

#[tokio::test]
async fn unknown_jobs_are_not_found() {
    let h = harness(10);
    assert!(matches!(
        h.ingestor.status(JobId(42)),
        Err(KlineError::NotFound { .. })
    ));
    assert!(matches!(
        h.ingestor.cancel(JobId(42)).await,
        Err(KlineError::NotFound { .. })
    ));
    assert!(matches!(
        h.ingestor.wait(JobId(42)).await,
        Err(KlineError::NotFound { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn jobs_lists_every_job_in_id_order() {
    let h = harness(10);
    let a = h.ingestor.submit(hourly(day())).await.unwrap();
    let b = h
        .ingestor
        .submit(hourly(TimeRange::new(at(0), at(5)).unwrap()))
        .await
        .unwrap();
    h.ingestor.wait(a).await.unwrap();
    h.ingestor.wait(b).await.unwrap();
    let ids: Vec<JobId> = h.ingestor.jobs().into_iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![a, b]);
    assert!(a < b);
}
