use chrono::{DateTime, TimeZone, Utc};
use kline_core::{
    Cursor, DataKind, Direction, Exchange, ExchangeAdapter, KlineError, MarketType, PageRequest,
    PaginationStyle, Record, SeriesKey, Storage, TimeRange, Timeframe,
};
use kline_mock::{MemoryStore, MockAdapter, MockBehavior, fixtures};

fn at(h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(h.into())
}

fn req(cursor: Option<Cursor>) -> PageRequest {
    PageRequest {
        key: SeriesKey::new(Exchange::Binance, "BTCUSDT", MarketType::Spot, Timeframe::H1),
        kind: DataKind::Candles,
        range: TimeRange::new(at(0), at(24)).unwrap(),
        cursor,
        direction: Direction::Forward,
    }
}

#[tokio::test]
async fn pages_walk_the_range() {
    let adapter = MockAdapter::new(Exchange::Binance).with_page_size(10);
    let p1 = adapter.fetch_page(&req(None)).await.unwrap();
    assert_eq!(p1.records.len(), 10);
    assert!(p1.has_more);
    let p3 = adapter
        .fetch_page(&req(Some(Cursor::Time(at(20)))))
        .await
        .unwrap();
    assert_eq!(p3.records.len(), 4);
    assert!(!p3.has_more);
    assert_eq!(p3.next_cursor, None);
}

#[tokio::test]
async fn token_pagination_roundtrips_cursor() {
    let adapter = MockAdapter::new(Exchange::Bybit)
        .with_page_size(10)
        .with_pagination(PaginationStyle::Cursor);
    let p1 = adapter.fetch_page(&req(None)).await.unwrap();
    let next = p1.next_cursor.clone().unwrap();
    assert!(next.as_token().is_some());
    let p2 = adapter.fetch_page(&req(Some(next))).await.unwrap();
    assert_eq!(p2.records[0].timestamp(), at(10));
}

#[tokio::test]
async fn scripted_behaviors_apply_in_order() {
    let (adapter, ctl) = MockAdapter::new_with_controller(Exchange::Okx);
    ctl.push([
        MockBehavior::Fail(KlineError::rate_limited("okx", Some(2_000))),
        MockBehavior::Omit(vec![at(3)]),
    ])
    .await;
    let err = adapter.fetch_page(&req(None)).await.unwrap_err();
    assert_eq!(err.retry_after_ms(), Some(2_000));
    let page = adapter.fetch_page(&req(None)).await.unwrap();
    assert_eq!(page.records.len(), 23);
    let page = adapter.fetch_page(&req(None)).await.unwrap();
    assert_eq!(page.records.len(), 24);
    assert_eq!(ctl.call_count().await, 3);
}

#[tokio::test]
async fn overrides_replace_values() {
    let (adapter, ctl) = MockAdapter::new_with_controller(Exchange::Binance);
    let key = req(None).key;
    let revised = fixtures::revised(&fixtures::candle(&key, at(5)), 7);
    ctl.set_value(Record::Candle(revised.clone())).await;
    let page = adapter.fetch_page(&req(None)).await.unwrap();
    assert_eq!(page.records[5], Record::Candle(revised));
}

#[tokio::test]
async fn memory_store_upserts_by_key() {
    let store = MemoryStore::new();
    let r = req(None);
    let series = fixtures::series(&r.key, DataKind::Candles, r.range);
    store.upsert(series.clone()).await.unwrap();
    store.upsert(series.clone()).await.unwrap();
    assert_eq!(store.len().await, 24);
    let window = TimeRange::new(at(2), at(4)).unwrap();
    let got = store.query(&r.key, DataKind::Candles, window).await.unwrap();
    assert_eq!(got, series[2..4].to_vec());

    store.fail_next_upserts(1).await;
    assert!(store.upsert(series).await.is_err());
    assert_eq!(store.upsert_count().await, 2);
}
