//! Shared HTTP plumbing: one `reqwest` client per adapter, status classification,
//! and numeric/timestamp parsing helpers.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use url::Url;

use kline_core::{Candle, Exchange, ExchangeConfig, KlineError, PageRequest, Record};

/// Longest body excerpt carried in error messages.
const BODY_EXCERPT: usize = 256;

/// Thin GET-only JSON client bound to one exchange.
#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    exchange: Exchange,
    client: reqwest::Client,
}

impl HttpClient {
    pub(crate) fn new(exchange: Exchange, config: &ExchangeConfig) -> Result<Self, KlineError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("kline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| KlineError::InvalidArg(format!("http client: {e}")))?;
        Ok(Self { exchange, client })
    }

    /// Build `base` + `path` with query pairs.
    pub(crate) fn url<'a, I>(&self, base: &str, path: &str, query: I) -> Result<Url, KlineError>
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        let mut url = Url::parse(base)
            .and_then(|u| u.join(path))
            .map_err(|e| KlineError::InvalidArg(format!("{} url {base}{path}: {e}", self.exchange)))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, &v);
            }
        }
        Ok(url)
    }

    /// Issue exactly one GET and return the body of a 2xx response.
    ///
    /// Non-2xx responses are classified: 429 and 418 become `RateLimited` (with the
    /// `Retry-After` hint when present), 5xx becomes `Transient`, any other status
    /// becomes `Malformed`. Transport failures and timeouts are `Transient`.
    pub(crate) async fn get(&self, url: Url) -> Result<(HeaderMap, String), KlineError> {
        #[cfg(feature = "tracing")]
        tracing::debug!(target = "kline::http", exchange = %self.exchange, %url, "GET");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| KlineError::transient(self.exchange.as_str(), e.to_string()))?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp
            .text()
            .await
            .map_err(|e| KlineError::transient(self.exchange.as_str(), e.to_string()))?;
        if status.is_success() {
            return Ok((headers, body));
        }
        Err(classify_status(self.exchange, status, &headers, &body))
    }

    /// GET and deserialize the body.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
    ) -> Result<(HeaderMap, T), KlineError> {
        let (headers, body) = self.get(url).await?;
        Ok((headers, from_json(self.exchange, &body)?))
    }
}

/// Map a non-success status to the adapter error taxonomy.
pub(crate) fn classify_status(
    exchange: Exchange,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> KlineError {
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
        return KlineError::rate_limited(exchange.as_str(), retry_after_ms(headers));
    }
    let msg = format!("HTTP {status}: {}", excerpt(body));
    if status.is_server_error() {
        KlineError::transient(exchange.as_str(), msg)
    } else {
        KlineError::malformed(exchange.as_str(), msg)
    }
}

/// `Retry-After` in delta-seconds form, as milliseconds.
pub(crate) fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|s| s.saturating_mul(1_000))
}

pub(crate) fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(BODY_EXCERPT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

pub(crate) fn from_json<T: DeserializeOwned>(exchange: Exchange, body: &str) -> Result<T, KlineError> {
    serde_json::from_str(body).map_err(|e| {
        KlineError::malformed(exchange.as_str(), format!("{e}; body: {}", excerpt(body)))
    })
}

pub(crate) fn from_millis(exchange: Exchange, ms: i64) -> Result<DateTime<Utc>, KlineError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| KlineError::malformed(exchange.as_str(), format!("timestamp {ms} out of range")))
}

pub(crate) fn millis_str(exchange: Exchange, s: &str) -> Result<DateTime<Utc>, KlineError> {
    let ms = s
        .trim()
        .parse::<i64>()
        .map_err(|_| KlineError::malformed(exchange.as_str(), format!("bad timestamp {s:?}")))?;
    from_millis(exchange, ms)
}

pub(crate) fn decimal_str(exchange: Exchange, s: &str) -> Result<Decimal, KlineError> {
    let s = s.trim();
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .map_err(|_| KlineError::malformed(exchange.as_str(), format!("bad decimal {s:?}")))
}

/// Decimal from a JSON string or number.
pub(crate) fn decimal_value(exchange: Exchange, v: &serde_json::Value) -> Result<Decimal, KlineError> {
    match v {
        serde_json::Value::String(s) => decimal_str(exchange, s),
        serde_json::Value::Number(n) => decimal_str(exchange, &n.to_string()),
        other => Err(KlineError::malformed(
            exchange.as_str(),
            format!("expected number, got {other}"),
        )),
    }
}

/// Millisecond timestamp from a JSON string or integer.
pub(crate) fn millis_value(exchange: Exchange, v: &serde_json::Value) -> Result<DateTime<Utc>, KlineError> {
    match v {
        serde_json::Value::String(s) => millis_str(exchange, s),
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| KlineError::malformed(exchange.as_str(), format!("bad timestamp {n}")))
            .and_then(|ms| from_millis(exchange, ms)),
        other => Err(KlineError::malformed(
            exchange.as_str(),
            format!("expected timestamp, got {other}"),
        )),
    }
}

/// Canonical candle for the series named by `req`.
pub(crate) fn candle(
    req: &PageRequest,
    open_time: DateTime<Utc>,
    [open, high, low, close, volume]: [Decimal; 5],
) -> Record {
    Record::Candle(Candle {
        exchange: req.key.exchange,
        symbol: req.key.symbol.clone(),
        market_type: req.key.market_type,
        timeframe: req.key.timeframe,
        open_time,
        open,
        high,
        low,
        close,
        volume,
    })
}

/// Sort ascending by timestamp (most exchanges answer newest first).
pub(crate) fn ascending(mut records: Vec<Record>) -> Vec<Record> {
    records.sort_by_key(Record::timestamp);
    records
}
