//! Coinbase Exchange candles (`/products/{id}/candles`).
//!
//! Rows are `[time, low, high, open, close, volume]` as JSON numbers with times in
//! seconds, newest first. At most 300 buckets per call; `start`/`end` are ISO-8601.
//! No 4h or weekly granularity, and no derivatives.

use async_trait::async_trait;
use chrono::{SecondsFormat, TimeDelta};
use serde_json::Value;

use kline_core::{
    AdapterCapabilities, DataKind, Direction, EndpointClass, Exchange, ExchangeAdapter,
    ExchangeConfig, KindCapability, KlineError, MarketType, Page, PageRequest, PaginationStyle,
    Record, Timeframe, TimeframeSet, time_window,
};

use crate::http::{self, HttpClient};

const EX: Exchange = Exchange::Coinbase;
const MAX_PER_PAGE: u32 = 300;

static CAPS: AdapterCapabilities = AdapterCapabilities {
    exchange: EX,
    candles: KindCapability {
        market_types: &[MarketType::Spot],
        timeframes: TimeframeSet::M5
            .union(TimeframeSet::M15)
            .union(TimeframeSet::H1)
            .union(TimeframeSet::D1),
        max_per_page: MAX_PER_PAGE,
        pagination: PaginationStyle::TimeWindow,
        direction: Direction::Forward,
    },
    open_interest: None,
};

fn granularity(tf: Timeframe) -> Result<i64, KlineError> {
    match tf {
        Timeframe::M5 | Timeframe::M15 | Timeframe::H1 | Timeframe::D1 => Ok(tf.step_secs()),
        Timeframe::H4 | Timeframe::W1 => Err(KlineError::unsupported(format!("{EX}/candles/{tf}"))),
    }
}

/// Coinbase Exchange public market-data adapter.
pub struct CoinbaseAdapter {
    http: HttpClient,
    config: ExchangeConfig,
}

impl CoinbaseAdapter {
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

fn parse_candles(req: &PageRequest, rows: &[Vec<Value>]) -> Result<Vec<Record>, KlineError> {
    rows.iter()
        .map(|row| {
            let [time, low, high, open, close, volume, ..] = row.as_slice() else {
                return Err(KlineError::malformed(
                    EX.as_str(),
                    format!("candle row has {} fields", row.len()),
                ));
            };
            let secs = time
                .as_i64()
                .ok_or_else(|| KlineError::malformed(EX.as_str(), format!("bad time {time}")))?;
            let open_time = http::from_millis(EX, secs.saturating_mul(1_000))?;
            let vals = [
                http::decimal_value(EX, open)?,
                http::decimal_value(EX, high)?,
                http::decimal_value(EX, low)?,
                http::decimal_value(EX, close)?,
                http::decimal_value(EX, volume)?,
            ];
            Ok(http::candle(req, open_time, vals))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(http::ascending)
}

#[async_trait]
impl ExchangeAdapter for CoinbaseAdapter {
    fn capabilities(&self) -> &AdapterCapabilities {
        &CAPS
    }

    fn endpoint_class(&self, _kind: DataKind, _market: MarketType) -> EndpointClass {
        EndpointClass::new("coinbase/public")
    }

    async fn fetch_page(&self, req: &PageRequest) -> Result<Page, KlineError> {
        if req.kind != DataKind::Candles || req.market_type() != MarketType::Spot {
            return Err(KlineError::unsupported(format!(
                "{EX}/{}/{}",
                req.kind,
                req.market_type()
            )));
        }
        let granularity = granularity(req.timeframe())?;
        let w = time_window(req, MAX_PER_PAGE)?;
        if w.window.is_empty() {
            return Ok(Page::default());
        }
        let last_bucket = w.window.end - TimeDelta::seconds(1);
        let url = self.http.url(
            &self.config.spot_base_url,
            &format!("/products/{}/candles", req.key.symbol),
            [
                ("granularity", granularity.to_string()),
                (
                    "start",
                    w.window.start.to_rfc3339_opts(SecondsFormat::Secs, true),
                ),
                ("end", last_bucket.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ],
        )?;
        let (_, rows): (_, Vec<Vec<Value>>) = self.http.get_json(url).await?;
        Ok(Page {
            records: parse_candles(req, &rows)?,
            next_cursor: w.has_more.then_some(w.next_cursor),
            has_more: w.has_more,
        })
    }
}
