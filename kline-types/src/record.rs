//! Canonical records produced by exchange adapters.

use core::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::market::{DataKind, Exchange, MarketType, Timeframe};

/// Identity of one series: everything in a record's natural key except its timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    /// Source exchange.
    pub exchange: Exchange,
    /// Exchange-native instrument identifier (e.g. `BTCUSDT`, `BTC-USD`).
    pub symbol: String,
    /// Market segment.
    pub market_type: MarketType,
    /// Bar interval.
    pub timeframe: Timeframe,
}

impl SeriesKey {
    /// Build a key; the symbol is trimmed and upper-cased.
    pub fn new(
        exchange: Exchange,
        symbol: impl AsRef<str>,
        market_type: MarketType,
        timeframe: Timeframe,
    ) -> Self {
        Self {
            exchange,
            symbol: symbol.as_ref().trim().to_ascii_uppercase(),
            market_type,
            timeframe,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.exchange, self.symbol, self.market_type, self.timeframe
        )
    }
}

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Source exchange.
    pub exchange: Exchange,
    /// Exchange-native instrument identifier.
    pub symbol: String,
    /// Market segment.
    pub market_type: MarketType,
    /// Bar interval.
    pub timeframe: Timeframe,
    /// Bar open instant, aligned to the timeframe grid.
    pub open_time: DateTime<Utc>,
    /// Opening price.
    pub open: Decimal,
    /// Highest traded price.
    pub high: Decimal,
    /// Lowest traded price.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
    /// Base-asset volume.
    pub volume: Decimal,
}

impl Candle {
    /// Series this candle belongs to.
    #[must_use]
    pub fn key(&self) -> SeriesKey {
        SeriesKey {
            exchange: self.exchange,
            symbol: self.symbol.clone(),
            market_type: self.market_type,
            timeframe: self.timeframe,
        }
    }

    /// Check the OHLC envelope: `high >= max(open, close)`, `low <= min(open, close)`,
    /// and a non-negative volume.
    ///
    /// # Errors
    /// Returns a description of the first violated condition.
    pub fn check_ohlc(&self) -> Result<(), String> {
        if self.high < self.open.max(self.close) {
            return Err(format!(
                "high {} below max(open {}, close {})",
                self.high, self.open, self.close
            ));
        }
        if self.low > self.open.min(self.close) {
            return Err(format!(
                "low {} above min(open {}, close {})",
                self.low, self.open, self.close
            ));
        }
        if self.volume.is_sign_negative() {
            return Err(format!("negative volume {}", self.volume));
        }
        Ok(())
    }

    fn same_values(&self, other: &Self) -> bool {
        self.open == other.open
            && self.high == other.high
            && self.low == other.low
            && self.close == other.close
            && self.volume == other.volume
    }
}

/// Aggregate open interest at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInterestPoint {
    /// Source exchange.
    pub exchange: Exchange,
    /// Exchange-native instrument identifier.
    pub symbol: String,
    /// Market segment (always futures for the exchanges that publish it).
    pub market_type: MarketType,
    /// Sampling interval.
    pub timeframe: Timeframe,
    /// Snapshot instant, aligned to the timeframe grid.
    pub timestamp: DateTime<Utc>,
    /// Outstanding contracts.
    pub value: Decimal,
}

impl OpenInterestPoint {
    /// Series this point belongs to.
    #[must_use]
    pub fn key(&self) -> SeriesKey {
        SeriesKey {
            exchange: self.exchange,
            symbol: self.symbol.clone(),
            market_type: self.market_type,
            timeframe: self.timeframe,
        }
    }
}

/// A canonical record of either kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Record {
    /// OHLCV bar.
    Candle(Candle),
    /// Open-interest snapshot.
    OpenInterest(OpenInterestPoint),
}

impl Record {
    /// Timestamp component of the natural key.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Candle(c) => c.open_time,
            Self::OpenInterest(p) => p.timestamp,
        }
    }

    /// Kind of series this record belongs to.
    #[must_use]
    pub const fn kind(&self) -> DataKind {
        match self {
            Self::Candle(_) => DataKind::Candles,
            Self::OpenInterest(_) => DataKind::OpenInterest,
        }
    }

    /// Series key (natural key minus timestamp).
    #[must_use]
    pub fn key(&self) -> SeriesKey {
        match self {
            Self::Candle(c) => c.key(),
            Self::OpenInterest(p) => p.key(),
        }
    }

    /// Timeframe of the series.
    #[must_use]
    pub const fn timeframe(&self) -> Timeframe {
        match self {
            Self::Candle(c) => c.timeframe,
            Self::OpenInterest(p) => p.timeframe,
        }
    }

    /// Whether two records for the same natural key carry identical values.
    #[must_use]
    pub fn same_values(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Candle(a), Self::Candle(b)) => a.same_values(b),
            (Self::OpenInterest(a), Self::OpenInterest(b)) => a.value == b.value,
            _ => false,
        }
    }

    /// Per-record invariants (OHLC envelope for candles, non-negative open interest).
    ///
    /// # Errors
    /// Returns a description of the violated invariant.
    pub fn check_invariants(&self) -> Result<(), String> {
        match self {
            Self::Candle(c) => c.check_ohlc(),
            Self::OpenInterest(p) if p.value.is_sign_negative() => {
                Err(format!("negative open interest {}", p.value))
            }
            Self::OpenInterest(_) => Ok(()),
        }
    }

    /// Borrow the candle, if this is one.
    #[must_use]
    pub const fn as_candle(&self) -> Option<&Candle> {
        match self {
            Self::Candle(c) => Some(c),
            Self::OpenInterest(_) => None,
        }
    }
}

impl From<Candle> for Record {
    fn from(c: Candle) -> Self {
        Self::Candle(c)
    }
}

impl From<OpenInterestPoint> for Record {
    fn from(p: OpenInterestPoint) -> Self {
        Self::OpenInterest(p)
    }
}
