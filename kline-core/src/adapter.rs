use async_trait::async_trait;
use chrono::TimeDelta;

use kline_types::{
    AdapterCapabilities, Cursor, DataKind, Direction, EndpointClass, Exchange, JobRequest,
    KlineError, MarketType, Record, SeriesKey, TimeRange, Timeframe,
};

/// One page request handed to an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Series to fetch.
    pub key: SeriesKey,
    /// Candles or open interest.
    pub kind: DataKind,
    /// Full job range `[start, end)`; adapters bound their request window by it.
    pub range: TimeRange,
    /// Position to continue from; `None` on the first page.
    pub cursor: Option<Cursor>,
    /// Walk direction.
    pub direction: Direction,
}

impl PageRequest {
    /// First page of a job request walking in `direction`.
    #[must_use]
    pub fn first(req: &JobRequest, direction: Direction) -> Self {
        Self {
            key: req.key.clone(),
            kind: req.kind,
            range: req.range,
            cursor: None,
            direction,
        }
    }

    /// Bar interval of the requested series.
    #[must_use]
    pub const fn timeframe(&self) -> Timeframe {
        self.key.timeframe
    }

    /// Market segment of the requested series.
    #[must_use]
    pub const fn market_type(&self) -> MarketType {
        self.key.market_type
    }
}

/// One page of canonical records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Page {
    /// Records in ascending timestamp order.
    pub records: Vec<Record>,
    /// Position for the following page.
    pub next_cursor: Option<Cursor>,
    /// Whether the adapter believes more data remains inside the range.
    pub has_more: bool,
}

/// Uniform contract every exchange variant implements.
///
/// Each `fetch_page` invocation performs exactly one outbound call.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Static capability metadata.
    fn capabilities(&self) -> &AdapterCapabilities;

    /// Exchange served by this adapter.
    fn exchange(&self) -> Exchange {
        self.capabilities().exchange
    }

    /// Rate-limit budget the endpoint for `(kind, market)` draws from.
    fn endpoint_class(&self, kind: DataKind, market: MarketType) -> EndpointClass;

    /// Fetch one page.
    ///
    /// # Errors
    /// `RateLimited`, `Transient`, or `Malformed` from the exchange; `Unsupported`
    /// when the request names a capability the adapter does not offer.
    async fn fetch_page(&self, req: &PageRequest) -> Result<Page, KlineError>;
}

/// Reject requests the adapter cannot serve.
///
/// # Errors
/// Returns `KlineError::Unsupported` naming the missing capability.
pub fn ensure_supported(caps: &AdapterCapabilities, req: &JobRequest) -> Result<(), KlineError> {
    let key = &req.key;
    let Some(kind_caps) = caps.for_kind(req.kind) else {
        return Err(KlineError::unsupported(format!("{}/{}", caps.exchange, req.kind)));
    };
    if !kind_caps.market_types.contains(&key.market_type) {
        return Err(KlineError::unsupported(format!(
            "{}/{}/{}",
            caps.exchange, req.kind, key.market_type
        )));
    }
    if !kind_caps.timeframes.supports(key.timeframe) {
        return Err(KlineError::unsupported(format!(
            "{}/{}/{}",
            caps.exchange, req.kind, key.timeframe
        )));
    }
    Ok(())
}

/// Request window computed for a time-window paginated endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    /// Bars to request, `[start, end)`.
    pub window: TimeRange,
    /// Far edge of the window in the walk direction.
    pub next_cursor: Cursor,
    /// Whether the far edge still lies strictly inside the job range.
    pub has_more: bool,
}

/// Compute the request window for a time-window endpoint returning at most
/// `max_per_page` bars per call.
///
/// Forward walks request `[cursor, min(cursor + max·step, range.end))`; backward walks
/// request `[max(cursor − max·step, range.start), cursor)`. Windows with no data
/// (before a listing, exchange downtime) still advance the cursor.
///
/// # Errors
/// Returns `KlineError::InvalidArg` when the cursor is a token.
pub fn time_window(req: &PageRequest, max_per_page: u32) -> Result<TimeWindow, KlineError> {
    let span = TimeDelta::seconds(req.timeframe().step_secs() * i64::from(max_per_page.max(1)));
    let range = req.range;
    let cursor = match &req.cursor {
        None => None,
        Some(Cursor::Time(ts)) => Some(*ts),
        Some(Cursor::Token(t)) => {
            return Err(KlineError::InvalidArg(format!(
                "time-window endpoint received token cursor {t:?}"
            )));
        }
    };
    Ok(match req.direction {
        Direction::Forward => {
            let start = cursor.unwrap_or(range.start).max(range.start);
            let end = (start + span).min(range.end).max(start);
            TimeWindow {
                window: TimeRange { start, end },
                next_cursor: Cursor::Time(end),
                has_more: end < range.end,
            }
        }
        Direction::Backward => {
            let end = cursor.unwrap_or(range.end).min(range.end);
            let start = (end - span).max(range.start).min(end);
            TimeWindow {
                window: TimeRange { start, end },
                next_cursor: Cursor::Time(start),
                has_more: start > range.start,
            }
        }
    })
}
