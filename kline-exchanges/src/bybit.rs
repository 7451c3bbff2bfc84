//! ByBit v5 market data: klines (`/v5/market/kline`) and open interest
//! (`/v5/market/open-interest`).
//!
//! Both answer newest first with millisecond timestamps encoded as strings, inside a
//! `{retCode, retMsg, result}` envelope. Kline `start`/`end` are inclusive. Open
//! interest pages backwards through `nextPageCursor` tokens.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::HeaderMap;
use serde::Deserialize;

use kline_core::{
    AdapterCapabilities, Cursor, DataKind, Direction, EndpointClass, Exchange, ExchangeAdapter,
    ExchangeConfig, KindCapability, KlineError, MarketType, OpenInterestPoint, Page, PageRequest,
    PaginationStyle, Record, Timeframe, TimeframeSet, time_window,
};

use crate::http::{self, HttpClient};

const EX: Exchange = Exchange::Bybit;
const KLINE_MAX: u32 = 1_000;
const OI_MAX: u32 = 200;
/// `retCode` for "too many visits".
const RET_RATE_LIMITED: i64 = 10_006;
const RESET_HEADER: &str = "x-bapi-limit-reset-timestamp";

static CAPS: AdapterCapabilities = AdapterCapabilities {
    exchange: EX,
    candles: KindCapability {
        market_types: &[MarketType::Spot, MarketType::Futures],
        timeframes: TimeframeSet::all(),
        max_per_page: KLINE_MAX,
        pagination: PaginationStyle::TimeWindow,
        direction: Direction::Forward,
    },
    open_interest: Some(KindCapability {
        market_types: &[MarketType::Futures],
        timeframes: TimeframeSet::M5
            .union(TimeframeSet::M15)
            .union(TimeframeSet::H1)
            .union(TimeframeSet::H4)
            .union(TimeframeSet::D1),
        max_per_page: OI_MAX,
        pagination: PaginationStyle::Cursor,
        direction: Direction::Backward,
    }),
};

const fn kline_interval(tf: Timeframe) -> &'static str {
    match tf {
        Timeframe::M5 => "5",
        Timeframe::M15 => "15",
        Timeframe::H1 => "60",
        Timeframe::H4 => "240",
        Timeframe::D1 => "D",
        Timeframe::W1 => "W",
    }
}

fn oi_interval(tf: Timeframe) -> Result<&'static str, KlineError> {
    Ok(match tf {
        Timeframe::M5 => "5min",
        Timeframe::M15 => "15min",
        Timeframe::H1 => "1h",
        Timeframe::H4 => "4h",
        Timeframe::D1 => "1d",
        Timeframe::W1 => return Err(KlineError::unsupported(format!("{EX}/open-interest/1w"))),
    })
}

const fn category(market: MarketType) -> &'static str {
    match market {
        MarketType::Spot => "spot",
        MarketType::Futures => "linear",
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    #[serde(default)]
    result: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct KlineResult {
    #[serde(default)]
    list: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct OiRow {
    #[serde(rename = "openInterest")]
    open_interest: String,
    timestamp: String,
}

#[derive(Debug, Default, Deserialize)]
struct OiResult {
    #[serde(default)]
    list: Vec<OiRow>,
    #[serde(rename = "nextPageCursor", default)]
    next_page_cursor: String,
}

/// ByBit public market-data adapter.
pub struct BybitAdapter {
    http: HttpClient,
    config: ExchangeConfig,
}

impl BybitAdapter {
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

    fn base(&self, market: MarketType) -> &str {
        match market {
            MarketType::Spot => &self.config.spot_base_url,
            MarketType::Futures => &self.config.futures_base_url,
        }
    }

    async fn fetch_klines(&self, req: &PageRequest) -> Result<Page, KlineError> {
        let w = time_window(req, KLINE_MAX)?;
        if w.window.is_empty() {
            return Ok(Page::default());
        }
        let url = self.http.url(
            self.base(req.market_type()),
            "/v5/market/kline",
            [
                ("category", category(req.market_type()).to_string()),
                ("symbol", req.key.symbol.clone()),
                ("interval", kline_interval(req.timeframe()).to_string()),
                ("start", w.window.start.timestamp_millis().to_string()),
                ("end", (w.window.end.timestamp_millis() - 1).to_string()),
                ("limit", KLINE_MAX.to_string()),
            ],
        )?;
        let (headers, env): (_, Envelope<KlineResult>) = self.http.get_json(url).await?;
        let result = unwrap_envelope(env, &headers)?;
        Ok(Page {
            records: parse_klines(req, &result.list)?,
            next_cursor: w.has_more.then_some(w.next_cursor),
            has_more: w.has_more,
        })
    }

    async fn fetch_open_interest(&self, req: &PageRequest) -> Result<Page, KlineError> {
        let mut query = vec![
            ("category", category(req.market_type()).to_string()),
            ("symbol", req.key.symbol.clone()),
            ("intervalTime", oi_interval(req.timeframe())?.to_string()),
            ("startTime", req.range.start.timestamp_millis().to_string()),
            ("endTime", (req.range.end.timestamp_millis() - 1).to_string()),
            ("limit", OI_MAX.to_string()),
        ];
        match &req.cursor {
            None => {}
            Some(Cursor::Token(t)) => query.push(("cursor", t.clone())),
            Some(Cursor::Time(_)) => {
                return Err(KlineError::InvalidArg(
                    "bybit open interest pages by cursor token".into(),
                ));
            }
        }
        let url = self
            .http
            .url(self.base(req.market_type()), "/v5/market/open-interest", query)?;
        let (headers, env): (_, Envelope<OiResult>) = self.http.get_json(url).await?;
        let result = unwrap_envelope(env, &headers)?;
        let records = parse_open_interest(req, &result.list)?;
        let reached_start = records
            .first()
            .is_some_and(|r| r.timestamp() <= req.range.start);
        let has_more = !result.next_page_cursor.is_empty() && !records.is_empty() && !reached_start;
        Ok(Page {
            records,
            next_cursor: has_more.then(|| Cursor::Token(result.next_page_cursor)),
            has_more,
        })
    }
}

/// Hint from the `X-Bapi-Limit-Reset-Timestamp` header (epoch millis).
fn reset_hint_ms(headers: &HeaderMap) -> Option<u64> {
    let reset: i64 = headers.get(RESET_HEADER)?.to_str().ok()?.trim().parse().ok()?;
    u64::try_from(reset - Utc::now().timestamp_millis()).ok()
}

fn unwrap_envelope<T: Default>(env: Envelope<T>, headers: &HeaderMap) -> Result<T, KlineError> {
    match env.ret_code {
        0 => Ok(env.result.unwrap_or_default()),
        RET_RATE_LIMITED => Err(KlineError::rate_limited(EX.as_str(), reset_hint_ms(headers))),
        code => Err(KlineError::malformed(
            EX.as_str(),
            format!("retCode {code}: {}", env.ret_msg),
        )),
    }
}

fn parse_klines(req: &PageRequest, rows: &[Vec<String>]) -> Result<Vec<Record>, KlineError> {
    rows.iter()
        .map(|row| {
            if row.len() < 6 {
                return Err(KlineError::malformed(
                    EX.as_str(),
                    format!("kline row has {} fields", row.len()),
                ));
            }
            let open_time = http::millis_str(EX, &row[0])?;
            let mut vals = [rust_decimal::Decimal::ZERO; 5];
            for (slot, v) in vals.iter_mut().zip(&row[1..6]) {
                *slot = http::decimal_str(EX, v)?;
            }
            Ok(http::candle(req, open_time, vals))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(http::ascending)
}

fn parse_open_interest(req: &PageRequest, rows: &[OiRow]) -> Result<Vec<Record>, KlineError> {
    rows.iter()
        .map(|row| {
            Ok(Record::OpenInterest(OpenInterestPoint {
                exchange: EX,
                symbol: req.key.symbol.clone(),
                market_type: req.key.market_type,
                timeframe: req.key.timeframe,
                timestamp: http::millis_str(EX, &row.timestamp)?,
                value: http::decimal_str(EX, &row.open_interest)?,
            }))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(http::ascending)
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    fn capabilities(&self) -> &AdapterCapabilities {
        &CAPS
    }

    fn endpoint_class(&self, _kind: DataKind, _market: MarketType) -> EndpointClass {
        EndpointClass::new("bybit/market")
    }

    async fn fetch_page(&self, req: &PageRequest) -> Result<Page, KlineError> {
        match req.kind {
            DataKind::Candles => self.fetch_klines(req).await,
            DataKind::OpenInterest => self.fetch_open_interest(req).await,
        }
    }
}
