use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use kline_core::{
    AdapterCapabilities, Cursor, DataKind, Direction, EndpointClass, Exchange, ExchangeAdapter,
    KindCapability, KlineError, MarketType, Page, PageRequest, PaginationStyle, Record,
    TimeframeSet, time_window,
};

use crate::fixtures;

/// Instruction for how one `fetch_page` call behaves.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Serve the page normally.
    Serve,
    /// Fail immediately with the provided error.
    Fail(KlineError),
    /// Hang indefinitely (simulate a stalled connection).
    Hang,
    /// Return an empty page whose cursor does not advance.
    Stall,
    /// Serve the page without bars at these timestamps.
    Omit(Vec<DateTime<Utc>>),
    /// Serve the page with these records appended after the regular ones.
    Append(Vec<Record>),
}

#[derive(Default)]
struct InternalState {
    script: VecDeque<MockBehavior>,
    missing: BTreeSet<DateTime<Utc>>,
    overrides: BTreeMap<DateTime<Utc>, Record>,
    calls: Vec<(Instant, PageRequest)>,
}

/// Controller handle used by tests to drive a [`MockAdapter`] from the outside.
#[derive(Clone)]
pub struct MockController {
    state: Arc<Mutex<InternalState>>,
}

impl MockController {
    /// Queue behaviors for the next calls, in order. Unscripted calls serve normally.
    pub async fn push(&self, behaviors: impl IntoIterator<Item = MockBehavior>) {
        self.state.lock().await.script.extend(behaviors);
    }

    /// Never serve a bar at `ts` (an exchange outage that no refetch fixes).
    pub async fn set_missing(&self, ts: DateTime<Utc>) {
        self.state.lock().await.missing.insert(ts);
    }

    /// Serve `record` instead of the synthetic value at its timestamp from now on.
    pub async fn set_value(&self, record: Record) {
        self.state
            .lock()
            .await
            .overrides
            .insert(record.timestamp(), record);
    }

    /// Drop every override and missing bar.
    pub async fn heal(&self) {
        let mut guard = self.state.lock().await;
        guard.missing.clear();
        guard.overrides.clear();
    }

    /// Requests received so far.
    pub async fn calls(&self) -> Vec<PageRequest> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Instants at which requests were received.
    pub async fn call_times(&self) -> Vec<Instant> {
        self.state.lock().await.calls.iter().map(|(t, _)| *t).collect()
    }

    /// Number of requests received.
    pub async fn call_count(&self) -> usize {
        self.state.lock().await.calls.len()
    }
}

const ALL_MARKETS: &[MarketType] = &[MarketType::Spot, MarketType::Futures];

/// Mock adapter serving a deterministic synthetic series for any key.
pub struct MockAdapter {
    caps: AdapterCapabilities,
    state: Arc<Mutex<InternalState>>,
}

impl MockAdapter {
    /// Forward, time-window paginated mock for `exchange` with 1000 bars per page,
    /// serving both kinds on both markets at every timeframe.
    #[must_use]
    pub fn new(exchange: Exchange) -> Self {
        let kind = KindCapability {
            market_types: ALL_MARKETS,
            timeframes: TimeframeSet::all(),
            max_per_page: 1_000,
            pagination: PaginationStyle::TimeWindow,
            direction: Direction::Forward,
        };
        Self {
            caps: AdapterCapabilities {
                exchange,
                candles: kind,
                open_interest: Some(kind),
            },
            state: Arc::new(Mutex::new(InternalState::default())),
        }
    }

    /// Mock plus a controller sharing its state.
    #[must_use]
    pub fn new_with_controller(exchange: Exchange) -> (Self, MockController) {
        let adapter = Self::new(exchange);
        let controller = adapter.controller();
        (adapter, controller)
    }

    /// A controller sharing this adapter's state.
    #[must_use]
    pub fn controller(&self) -> MockController {
        MockController {
            state: Arc::clone(&self.state),
        }
    }

    /// Limit every page to `n` records.
    #[must_use]
    pub fn with_page_size(mut self, n: u32) -> Self {
        self.caps.candles.max_per_page = n;
        if let Some(oi) = &mut self.caps.open_interest {
            oi.max_per_page = n;
        }
        self
    }

    /// Paginate with opaque cursor tokens instead of time windows.
    #[must_use]
    pub fn with_pagination(mut self, style: PaginationStyle) -> Self {
        self.caps.candles.pagination = style;
        if let Some(oi) = &mut self.caps.open_interest {
            oi.pagination = style;
        }
        self
    }

    /// Native walk direction.
    #[must_use]
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.caps.candles.direction = direction;
        if let Some(oi) = &mut self.caps.open_interest {
            oi.direction = direction;
        }
        self
    }

    /// Restrict served markets and candle timeframes.
    #[must_use]
    pub const fn with_candles(
        mut self,
        markets: &'static [MarketType],
        timeframes: TimeframeSet,
    ) -> Self {
        self.caps.candles.market_types = markets;
        self.caps.candles.timeframes = timeframes;
        self
    }

    /// Do not offer open interest.
    #[must_use]
    pub const fn without_open_interest(mut self) -> Self {
        self.caps.open_interest = None;
        self
    }

    fn style(&self, kind: DataKind) -> Result<(PaginationStyle, u32), KlineError> {
        self.caps
            .for_kind(kind)
            .map(|k| (k.pagination, k.max_per_page))
            .ok_or_else(|| KlineError::unsupported(format!("{}/{kind}", self.caps.exchange)))
    }
}

fn decode_token(token: &str) -> Result<DateTime<Utc>, KlineError> {
    token
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| KlineError::malformed("mock", format!("bad cursor token {token:?}")))
}

#[async_trait]
impl ExchangeAdapter for MockAdapter {
    fn capabilities(&self) -> &AdapterCapabilities {
        &self.caps
    }

    fn endpoint_class(&self, kind: DataKind, _market: MarketType) -> EndpointClass {
        match kind {
            DataKind::Candles => EndpointClass::new("mock/candles"),
            DataKind::OpenInterest => EndpointClass::new("mock/open-interest"),
        }
    }

    async fn fetch_page(&self, req: &PageRequest) -> Result<Page, KlineError> {
        let (style, max) = self.style(req.kind)?;
        // Acquire behavior snapshot without holding the lock across await points
        let (behavior, missing, overrides) = {
            let mut guard = self.state.lock().await;
            guard.calls.push((Instant::now(), req.clone()));
            let behavior = guard.script.pop_front().unwrap_or(MockBehavior::Serve);
            (behavior, guard.missing.clone(), guard.overrides.clone())
        };

        let mut time_req = req.clone();
        if style == PaginationStyle::Cursor
            && let Some(Cursor::Token(t)) = &req.cursor
        {
            time_req.cursor = Some(Cursor::Time(decode_token(t)?));
        }
        let window = time_window(&time_req, max)?;
        let encode = |c: Cursor| match (style, c) {
            (PaginationStyle::Cursor, Cursor::Time(ts)) => {
                Cursor::Token(ts.timestamp_millis().to_string())
            }
            (_, c) => c,
        };

        let mut records: Vec<Record> = fixtures::series(&req.key, req.kind, window.window)
            .into_iter()
            .filter(|r| !missing.contains(&r.timestamp()))
            .map(|r| overrides.get(&r.timestamp()).cloned().unwrap_or(r))
            .collect();

        match behavior {
            MockBehavior::Serve => {}
            MockBehavior::Fail(e) => return Err(e),
            MockBehavior::Hang => return std::future::pending().await,
            MockBehavior::Stall => {
                return Ok(Page {
                    records: Vec::new(),
                    next_cursor: req.cursor.clone().or_else(|| {
                        Some(encode(Cursor::Time(match req.direction {
                            Direction::Forward => req.range.start,
                            Direction::Backward => req.range.end,
                        })))
                    }),
                    has_more: true,
                });
            }
            MockBehavior::Omit(ts) => records.retain(|r| !ts.contains(&r.timestamp())),
            MockBehavior::Append(extra) => records.extend(extra),
        }

        Ok(Page {
            records,
            next_cursor: window.has_more.then(|| encode(window.next_cursor)),
            has_more: window.has_more,
        })
    }
}
