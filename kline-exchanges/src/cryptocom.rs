//! Crypto.com Exchange candlesticks (`/exchange/v1/public/get-candlestick`).
//!
//! Rows are `{t, o, h, l, c, v}` with millisecond `t` inside a
//! `{code, message, result: {data}}` envelope. Perpetuals use `-PERP` instruments.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use kline_core::{
    AdapterCapabilities, DataKind, Direction, EndpointClass, Exchange, ExchangeAdapter,
    ExchangeConfig, KindCapability, KlineError, MarketType, Page, PageRequest, PaginationStyle,
    Record, Timeframe, TimeframeSet, time_window,
};

use crate::http::{self, HttpClient};

const EX: Exchange = Exchange::Cryptocom;
const MAX_PER_PAGE: u32 = 300;
/// `TOO_MANY_REQUESTS` in both the legacy and v1 code tables.
const RATE_LIMIT_CODES: [i64; 2] = [10_006, 42_901];

static CAPS: AdapterCapabilities = AdapterCapabilities {
    exchange: EX,
    candles: KindCapability {
        market_types: &[MarketType::Spot, MarketType::Futures],
        timeframes: TimeframeSet::all(),
        max_per_page: MAX_PER_PAGE,
        pagination: PaginationStyle::TimeWindow,
        direction: Direction::Forward,
    },
    open_interest: None,
};

const fn timeframe(tf: Timeframe) -> &'static str {
    match tf {
        Timeframe::M5 => "5m",
        Timeframe::M15 => "15m",
        Timeframe::H1 => "1h",
        Timeframe::H4 => "4h",
        Timeframe::D1 => "1D",
        Timeframe::W1 => "7D",
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Option<CandleResult>,
}

#[derive(Debug, Default, Deserialize)]
struct CandleResult {
    #[serde(default)]
    data: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct Row {
    t: Value,
    o: Value,
    h: Value,
    l: Value,
    c: Value,
    v: Value,
}

/// Crypto.com Exchange public market-data adapter.
pub struct CryptocomAdapter {
    http: HttpClient,
    config: ExchangeConfig,
}

impl CryptocomAdapter {
    /// Adapter against the given endpoints.
    ///
    /// # Errors
    /// Returns `KlineError::InvalidArg` when the HTTP client cannot be built.
    pub fn new(config: ExchangeConfig) -> Result<Self, KlineError> {
        Ok(Self {
            http: HttpClient::new(EX, &config)?,
            config,
        })
    }

    /// Adapter against the public production endpoints.
    ///
    /// # Errors
    /// Returns `KlineError::InvalidArg` when the HTTP client cannot be built.
    pub fn production() -> Result<Self, KlineError> {
        Self::new(ExchangeConfig::production(EX))
    }
}

fn unwrap_envelope(env: Envelope) -> Result<Vec<Row>, KlineError> {
    match env.code {
        0 => Ok(env.result.unwrap_or_default().data),
        code if RATE_LIMIT_CODES.contains(&code) => Err(KlineError::rate_limited(EX.as_str(), None)),
        code => Err(KlineError::malformed(
            EX.as_str(),
            format!("code {code}: {}", env.message.unwrap_or_default()),
        )),
    }
}

fn parse_rows(req: &PageRequest, rows: &[Row]) -> Result<Vec<Record>, KlineError> {
    rows.iter()
        .map(|r| {
            let vals = [
                http::decimal_value(EX, &r.o)?,
                http::decimal_value(EX, &r.h)?,
                http::decimal_value(EX, &r.l)?,
                http::decimal_value(EX, &r.c)?,
                http::decimal_value(EX, &r.v)?,
            ];
            Ok(http::candle(req, http::millis_value(EX, &r.t)?, vals))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(http::ascending)
}

#[async_trait]
impl ExchangeAdapter for CryptocomAdapter {
    fn capabilities(&self) -> &AdapterCapabilities {
        &CAPS
    }

    fn endpoint_class(&self, _kind: DataKind, _market: MarketType) -> EndpointClass {
        EndpointClass::new("cryptocom/public")
    }

    async fn fetch_page(&self, req: &PageRequest) -> Result<Page, KlineError> {
        if req.kind != DataKind::Candles {
            return Err(KlineError::unsupported(format!("{EX}/{}", req.kind)));
        }
        let w = time_window(req, MAX_PER_PAGE)?;
        if w.window.is_empty() {
            return Ok(Page::default());
        }
        let base = match req.market_type() {
            MarketType::Spot => &self.config.spot_base_url,
            MarketType::Futures => &self.config.futures_base_url,
        };
        let url = self.http.url(
            base,
            "/exchange/v1/public/get-candlestick",
            [
                ("instrument_name", req.key.symbol.clone()),
                ("timeframe", timeframe(req.timeframe()).to_string()),
                ("count", MAX_PER_PAGE.to_string()),
                ("start_ts", w.window.start.timestamp_millis().to_string()),
                ("end_ts", (w.window.end.timestamp_millis() - 1).to_string()),
            ],
        )?;
        let (_, env): (_, Envelope) = self.http.get_json(url).await?;
        let rows = unwrap_envelope(env)?;
        Ok(Page {
            records: parse_rows(req, &rows)?,
            next_cursor: w.has_more.then_some(w.next_cursor),
            has_more: w.has_more,
        })
    }
}
