//! Binance spot (`/api/v3/klines`) and USDⓈ-M futures (`/fapi/v1/klines`).
//!
//! Rows are `[openTime, open, high, low, close, volume, closeTime, ...]` with
//! millisecond open times, ascending. `startTime`/`endTime` are inclusive.

use async_trait::async_trait;
use serde_json::Value;

use kline_core::{
    AdapterCapabilities, DataKind, Direction, EndpointClass, Exchange, ExchangeAdapter,
    ExchangeConfig, KindCapability, KlineError, MarketType, Page, PageRequest, PaginationStyle,
    Record, Timeframe, TimeframeSet, time_window,
};

use crate::http::{self, HttpClient};

const EX: Exchange = Exchange::Binance;
const MAX_PER_PAGE: u32 = 1_000;

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

const fn interval(tf: Timeframe) -> &'static str {
    match tf {
        Timeframe::M5 => "5m",
        Timeframe::M15 => "15m",
        Timeframe::H1 => "1h",
        Timeframe::H4 => "4h",
        Timeframe::D1 => "1d",
        Timeframe::W1 => "1w",
    }
}

/// Binance public market-data adapter.
pub struct BinanceAdapter {
    http: HttpClient,
    config: ExchangeConfig,
}

impl BinanceAdapter {
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

pub(crate) fn parse_klines(req: &PageRequest, rows: &[Vec<Value>]) -> Result<Vec<Record>, KlineError> {
    rows.iter()
        .map(|row| {
            if row.len() < 6 {
                return Err(KlineError::malformed(
                    EX.as_str(),
                    format!("kline row has {} fields", row.len()),
                ));
            }
            let open_time = http::millis_value(EX, &row[0])?;
            let mut vals = [rust_decimal::Decimal::ZERO; 5];
            for (slot, v) in vals.iter_mut().zip(&row[1..6]) {
                *slot = http::decimal_value(EX, v)?;
            }
            Ok(http::candle(req, open_time, vals))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(http::ascending)
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn capabilities(&self) -> &AdapterCapabilities {
        &CAPS
    }

    fn endpoint_class(&self, _kind: DataKind, market: MarketType) -> EndpointClass {
        match market {
            MarketType::Spot => EndpointClass::new("binance/api"),
            MarketType::Futures => EndpointClass::new("binance/fapi"),
        }
    }

    async fn fetch_page(&self, req: &PageRequest) -> Result<Page, KlineError> {
        if req.kind != DataKind::Candles {
            return Err(KlineError::unsupported(format!("{EX}/{}", req.kind)));
        }
        let w = time_window(req, MAX_PER_PAGE)?;
        if w.window.is_empty() {
            return Ok(Page::default());
        }
        let (base, path) = match req.market_type() {
            MarketType::Spot => (&self.config.spot_base_url, "/api/v3/klines"),
            MarketType::Futures => (&self.config.futures_base_url, "/fapi/v1/klines"),
        };
        let url = self.http.url(
            base,
            path,
            [
                ("symbol", req.key.symbol.clone()),
                ("interval", interval(req.timeframe()).to_string()),
                ("startTime", w.window.start.timestamp_millis().to_string()),
                ("endTime", (w.window.end.timestamp_millis() - 1).to_string()),
                ("limit", MAX_PER_PAGE.to_string()),
            ],
        )?;
        let (_, rows): (_, Vec<Vec<Value>>) = self.http.get_json(url).await?;
        Ok(Page {
            records: parse_klines(req, &rows)?,
            next_cursor: w.has_more.then_some(w.next_cursor),
            has_more: w.has_more,
        })
    }
}
