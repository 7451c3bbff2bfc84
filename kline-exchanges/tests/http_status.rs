use chrono::{DateTime, TimeZone, Utc};
use httpmock::prelude::*;
use kline_core::{
    Cursor, DataKind, Direction, Exchange, ExchangeAdapter, ExchangeConfig, KlineError,
    MarketType, PageRequest, SeriesKey, TimeRange, Timeframe,
};
use kline_exchanges::{BinanceAdapter, BybitAdapter, CoinbaseAdapter, OkxAdapter, adapter_for};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn req(exchange: Exchange, symbol: &str, market: MarketType, direction: Direction) -> PageRequest {
    PageRequest {
        key: SeriesKey::new(exchange, symbol, market, Timeframe::H1),
        kind: DataKind::Candles,
        range: TimeRange::new(start(), start() + Timeframe::H1.step() * 2).unwrap(),
        cursor: None,
        direction,
    }
}

#[tokio::test]
async fn binance_success_sends_inclusive_window() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v3/klines")
                .query_param("symbol", "BTCUSDT")
                .query_param("interval", "1h")
                .query_param("startTime", "1704067200000")
                .query_param("endTime", "1704074399999");
            then.status(200).body(
                r#"[[1704067200000,"1","2","0.5","1.5","10",1704070799999,"0",1,"0","0","0"],
                    [1704070800000,"1.5","2","1","1.8","11",1704074399999,"0",1,"0","0","0"]]"#,
            );
        })
        .await;
    let adapter = BinanceAdapter::new(ExchangeConfig::with_base_url(server.base_url())).unwrap();
    let page = adapter
        .fetch_page(&req(Exchange::Binance, "btcusdt", MarketType::Spot, Direction::Forward))
        .await
        .unwrap();
    mock.assert_async().await;
    assert_eq!(page.records.len(), 2);
    assert!(!page.has_more);
}

#[tokio::test]
async fn binance_futures_use_fapi_path() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/fapi/v1/klines");
            then.status(200).body("[]");
        })
        .await;
    let adapter = BinanceAdapter::new(ExchangeConfig::with_base_url(server.base_url())).unwrap();
    let page = adapter
        .fetch_page(&req(Exchange::Binance, "BTCUSDT", MarketType::Futures, Direction::Forward))
        .await
        .unwrap();
    mock.assert_async().await;
    assert!(page.records.is_empty());
}

#[tokio::test]
async fn http_429_carries_retry_after() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v3/klines");
            then.status(429).header("Retry-After", "2").body("{}");
        })
        .await;
    let adapter = BinanceAdapter::new(ExchangeConfig::with_base_url(server.base_url())).unwrap();
    let err = adapter
        .fetch_page(&req(Exchange::Binance, "BTCUSDT", MarketType::Spot, Direction::Forward))
        .await
        .unwrap_err();
    assert_eq!(err.retry_after_ms(), Some(2_000));
}

#[tokio::test]
async fn server_errors_are_transient_client_errors_malformed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/products/BTC-USD/candles");
            then.status(503).body("unavailable");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/products/NOPE-USD/candles");
            then.status(404).body(r#"{"message":"NotFound"}"#);
        })
        .await;
    let adapter = CoinbaseAdapter::new(ExchangeConfig::with_base_url(server.base_url())).unwrap();
    let err = adapter
        .fetch_page(&req(Exchange::Coinbase, "BTC-USD", MarketType::Spot, Direction::Forward))
        .await
        .unwrap_err();
    assert!(matches!(err, KlineError::Transient { .. }));
    let err = adapter
        .fetch_page(&req(Exchange::Coinbase, "NOPE-USD", MarketType::Spot, Direction::Forward))
        .await
        .unwrap_err();
    assert!(matches!(err, KlineError::Malformed { .. }));
}

#[tokio::test]
async fn invalid_json_is_malformed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v5/market/history-candles");
            then.status(200).body("<html>maintenance</html>");
        })
        .await;
    let adapter = OkxAdapter::new(ExchangeConfig::with_base_url(server.base_url())).unwrap();
    let err = adapter
        .fetch_page(&req(Exchange::Okx, "BTC-USDT", MarketType::Spot, Direction::Forward))
        .await
        .unwrap_err();
    assert!(matches!(err, KlineError::Malformed { .. }));
}

#[tokio::test]
async fn okx_rate_limit_code_in_200_response() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v5/market/history-candles")
                .query_param("instId", "BTC-USDT-SWAP")
                .query_param("bar", "1H")
                .query_param("after", "1704074400000")
                .query_param("before", "1704067199999");
            then.status(200)
                .body(r#"{"code":"50011","msg":"Too Many Requests","data":[]}"#);
        })
        .await;
    let adapter = OkxAdapter::new(ExchangeConfig::with_base_url(server.base_url())).unwrap();
    let err = adapter
        .fetch_page(&req(Exchange::Okx, "BTC-USDT-SWAP", MarketType::Futures, Direction::Forward))
        .await
        .unwrap_err();
    assert!(matches!(err, KlineError::RateLimited { .. }));
}

#[tokio::test]
async fn okx_walks_forward_in_ascending_windows() {
    let server = MockServer::start_async().await;
    let first = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v5/market/history-candles")
                .query_param("after", "1704427200000")
                .query_param("before", "1704067199999");
            then.status(200).body(
                r#"{"code":"0","msg":"","data":[
                    ["1704070800000","2","3","1.5","2.5","12","0","0","1"],
                    ["1704067200000","1","2","0.5","1.5","10","0","0","1"]
                ]}"#,
            );
        })
        .await;
    let second = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v5/market/history-candles")
                .query_param("after", "1704607200000")
                .query_param("before", "1704427199999");
            then.status(200).body(r#"{"code":"0","msg":"","data":[]}"#);
        })
        .await;
    let adapter = OkxAdapter::new(ExchangeConfig::with_base_url(server.base_url())).unwrap();
    assert_eq!(adapter.capabilities().candles.direction, Direction::Forward);

    let mut r = req(Exchange::Okx, "BTC-USDT", MarketType::Spot, Direction::Forward);
    r.range = TimeRange::new(start(), start() + Timeframe::H1.step() * 150).unwrap();
    let page = adapter.fetch_page(&r).await.unwrap();
    first.assert_async().await;
    let stamps: Vec<_> = page.records.iter().map(|rec| rec.timestamp()).collect();
    assert_eq!(stamps, vec![start(), start() + Timeframe::H1.step()]);
    let boundary = start() + Timeframe::H1.step() * 100;
    assert_eq!(page.next_cursor, Some(Cursor::Time(boundary)));
    assert!(page.has_more);

    r.cursor = page.next_cursor;
    let page = adapter.fetch_page(&r).await.unwrap();
    second.assert_async().await;
    assert!(page.records.is_empty());
    assert!(!page.has_more);
}

#[tokio::test]
async fn bybit_open_interest_follows_cursor_tokens() {
    let server = MockServer::start_async().await;
    let first = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v5/market/open-interest")
                .query_param("category", "linear")
                .query_param("intervalTime", "1h")
                .query_param_missing("cursor");
            then.status(200).body(
                r#"{"retCode":0,"retMsg":"OK","result":{"list":[
                    {"openInterest":"100.5","timestamp":"1704070800000"}
                ],"nextPageCursor":"page2"}}"#,
            );
        })
        .await;
    let second = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v5/market/open-interest")
                .query_param("cursor", "page2");
            then.status(200).body(
                r#"{"retCode":0,"retMsg":"OK","result":{"list":[
                    {"openInterest":"99.0","timestamp":"1704067200000"}
                ],"nextPageCursor":"page3"}}"#,
            );
        })
        .await;

    let adapter = BybitAdapter::new(ExchangeConfig::with_base_url(server.base_url())).unwrap();
    let mut r = req(Exchange::Bybit, "BTCUSDT", MarketType::Futures, Direction::Backward);
    r.kind = DataKind::OpenInterest;
    let p1 = adapter.fetch_page(&r).await.unwrap();
    assert!(p1.has_more);
    assert_eq!(p1.next_cursor, Some(Cursor::Token("page2".into())));

    r.cursor = p1.next_cursor;
    let p2 = adapter.fetch_page(&r).await.unwrap();
    // Oldest record reached the range start.
    assert!(!p2.has_more);
    assert_eq!(p2.records[0].timestamp(), start());
    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn transport_failure_is_transient() {
    // Nothing listens on port 9 on loopback.
    let adapter = adapter_for(Exchange::Cryptocom, ExchangeConfig::with_base_url("http://127.0.0.1:9"))
        .unwrap();
    let err = adapter
        .fetch_page(&req(Exchange::Cryptocom, "BTC_USDT", MarketType::Spot, Direction::Forward))
        .await
        .unwrap_err();
    assert!(matches!(err, KlineError::Transient { .. }));
}
