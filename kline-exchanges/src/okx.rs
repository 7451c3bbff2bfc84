//! OKX history candles (`/api/v5/market/history-candles`).
//!
//! Rows are `[ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]` as strings, newest
//! first, inside a `{code, msg, data}` envelope. `after` and `before` are exclusive
//! bounds set from the request window, so the walk moves forward in windows of 100
//! bars and rows are re-sorted ascending. Bars still forming (`confirm == "0"`) are
//! dropped.

use async_trait::async_trait;
use serde::Deserialize;

use kline_core::{
    AdapterCapabilities, DataKind, Direction, EndpointClass, Exchange, ExchangeAdapter,
    ExchangeConfig, KindCapability, KlineError, MarketType, Page, PageRequest, PaginationStyle,
    Record, Timeframe, TimeframeSet, time_window,
};

use crate::http::{self, HttpClient};

const EX: Exchange = Exchange::Okx;
const MAX_PER_PAGE: u32 = 100;
/// "Too many requests".
const CODE_RATE_LIMITED: &str = "50011";

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

const fn bar(tf: Timeframe) -> &'static str {
    match tf {
        Timeframe::M5 => "5m",
        Timeframe::M15 => "15m",
        Timeframe::H1 => "1H",
        Timeframe::H4 => "4H",
        Timeframe::D1 => "1Dutc",
        Timeframe::W1 => "1Wutc",
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<Vec<String>>,
}

/// OKX public market-data adapter.
pub struct OkxAdapter {
    http: HttpClient,
    config: ExchangeConfig,
}

impl OkxAdapter {
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

fn unwrap_envelope(env: Envelope) -> Result<Vec<Vec<String>>, KlineError> {
    match env.code.as_str() {
        "0" => Ok(env.data),
        CODE_RATE_LIMITED => Err(KlineError::rate_limited(EX.as_str(), None)),
        code => Err(KlineError::malformed(EX.as_str(), format!("code {code}: {}", env.msg))),
    }
}

fn parse_rows(req: &PageRequest, rows: &[Vec<String>]) -> Result<Vec<Record>, KlineError> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() < 6 {
            return Err(KlineError::malformed(
                EX.as_str(),
                format!("candle row has {} fields", row.len()),
            ));
        }
        if row.get(8).is_some_and(|confirm| confirm == "0") {
            continue;
        }
        let open_time = http::millis_str(EX, &row[0])?;
        let mut vals = [rust_decimal::Decimal::ZERO; 5];
        for (slot, v) in vals.iter_mut().zip(&row[1..6]) {
            *slot = http::decimal_str(EX, v)?;
        }
        out.push(http::candle(req, open_time, vals));
    }
    Ok(http::ascending(out))
}

#[async_trait]
impl ExchangeAdapter for OkxAdapter {
    fn capabilities(&self) -> &AdapterCapabilities {
        &CAPS
    }

    fn endpoint_class(&self, _kind: DataKind, _market: MarketType) -> EndpointClass {
        EndpointClass::new("okx/history-candles")
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
        // Exclusive bounds: `after` returns rows older than it, `before` newer than it.
        let url = self.http.url(
            base,
            "/api/v5/market/history-candles",
            [
                ("instId", req.key.symbol.clone()),
                ("bar", bar(req.timeframe()).to_string()),
                ("after", w.window.end.timestamp_millis().to_string()),
                ("before", (w.window.start.timestamp_millis() - 1).to_string()),
                ("limit", MAX_PER_PAGE.to_string()),
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use kline_core::{SeriesKey, TimeRange};

    fn req() -> PageRequest {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        PageRequest {
            key: SeriesKey::new(EX, "BTC-USDT-SWAP", MarketType::Futures, Timeframe::H1),
            kind: DataKind::Candles,
            range: TimeRange::new(start, start + Timeframe::H1.step() * 24).unwrap(),
            cursor: None,
            direction: Direction::Forward,
        }
    }

    #[test]
    fn drops_unconfirmed_bars() {
        let body = r#"{"code":"0","msg":"","data":[
            ["1704074400000","42600","42700","42550","42650","10","426000","426000","0"],
            ["1704070800000","42500","42620","42480","42600","12","511000","511000","1"],
            ["1704067200000","42300","42520","42250","42500","9","382000","382000","1"]
        ]}"#;
        let env: Envelope = serde_json::from_str(body).unwrap();
        let recs = parse_rows(&req(), &unwrap_envelope(env).unwrap()).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].timestamp(), req().range.start);
    }

    #[test]
    fn rate_limit_code_is_classified() {
        let env: Envelope =
            serde_json::from_str(r#"{"code":"50011","msg":"Too Many Requests","data":[]}"#).unwrap();
        assert!(matches!(unwrap_envelope(env), Err(KlineError::RateLimited { .. })));
        let env: Envelope =
            serde_json::from_str(r#"{"code":"51001","msg":"Instrument ID does not exist","data":[]}"#)
                .unwrap();
        assert!(matches!(unwrap_envelope(env), Err(KlineError::Malformed { .. })));
    }
}
