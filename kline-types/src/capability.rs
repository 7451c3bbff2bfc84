use core::fmt;

use crate::market::{DataKind, Exchange, MarketType, Timeframe, TimeframeSet};
use crate::range::Direction;

/// How an adapter walks through a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaginationStyle {
    /// Each request names an explicit `[start, end]` window; the cursor is the next window edge.
    TimeWindow,
    /// The server issues a continuation token with every page.
    Cursor,
}

/// Label for a group of endpoints that share one rate-limit budget on an exchange.
///
/// Rate limiters are keyed by `(Exchange, EndpointClass)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointClass(pub &'static str);

impl EndpointClass {
    /// Construct a class label from a static name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the inner static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Per-kind capability block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindCapability {
    /// Markets this kind is published for.
    pub market_types: &'static [MarketType],
    /// Timeframes this kind is published at.
    pub timeframes: TimeframeSet,
    /// Maximum records a single page may return.
    pub max_per_page: u32,
    /// Pagination discipline of the endpoint.
    pub pagination: PaginationStyle,
    /// Direction the endpoint pages through time natively.
    pub direction: Direction,
}

/// Static capability metadata an adapter declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterCapabilities {
    /// Exchange served.
    pub exchange: Exchange,
    /// Candle endpoint capabilities.
    pub candles: KindCapability,
    /// Open-interest endpoint capabilities, when the exchange publishes them.
    pub open_interest: Option<KindCapability>,
}

impl AdapterCapabilities {
    /// Capability block for `kind`, if supported at all.
    #[must_use]
    pub const fn for_kind(&self, kind: DataKind) -> Option<&KindCapability> {
        match kind {
            DataKind::Candles => Some(&self.candles),
            DataKind::OpenInterest => self.open_interest.as_ref(),
        }
    }

    /// Whether the adapter publishes open interest at all.
    #[must_use]
    pub const fn supports_open_interest(&self) -> bool {
        self.open_interest.is_some()
    }

    /// Whether `(kind, market, timeframe)` can be served.
    #[must_use]
    pub fn supports(&self, kind: DataKind, market: MarketType, tf: Timeframe) -> bool {
        self.for_kind(kind)
            .is_some_and(|k| k.market_types.contains(&market) && k.timeframes.supports(tf))
    }
}
