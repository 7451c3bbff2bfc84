//! Exchanges, market types, and the timeframe grid.

use core::fmt;
use core::str::FromStr;

use bitflags::bitflags;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::KlineError;

/// Exchanges with a historical market-data adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    /// Binance spot and USDⓈ-M futures.
    Binance,
    /// ByBit spot and linear derivatives.
    Bybit,
    /// Coinbase Exchange (spot only).
    Coinbase,
    /// Crypto.com Exchange.
    Cryptocom,
    /// OKX spot and perpetual swaps.
    Okx,
}

impl Exchange {
    /// Every supported exchange, in a stable order.
    pub const ALL: [Self; 5] = [
        Self::Binance,
        Self::Bybit,
        Self::Coinbase,
        Self::Cryptocom,
        Self::Okx,
    ];

    /// Stable lowercase identifier for logs, keys, and configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Bybit => "bybit",
            Self::Coinbase => "coinbase",
            Self::Cryptocom => "cryptocom",
            Self::Okx => "okx",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = KlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| KlineError::InvalidArg(format!("unknown exchange: {s}")))
    }
}

/// Market segment a series belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    /// Spot order books.
    Spot,
    /// Perpetual or dated futures (linear contracts).
    Futures,
}

impl MarketType {
    /// Stable lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Futures => "futures",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of series a job ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataKind {
    /// OHLCV candles.
    Candles,
    /// Open-interest snapshots.
    OpenInterest,
}

impl DataKind {
    /// Stable kebab-case identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Candles => "candles",
            Self::OpenInterest => "open-interest",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bar interval. Every timeframe defines a fixed UTC grid.
///
/// Sub-daily and daily grids are anchored at the Unix epoch; the weekly grid is
/// anchored at Monday 00:00 UTC, which is where every supported exchange opens
/// its weekly bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// Five minutes.
    #[serde(rename = "5m")]
    M5,
    /// Fifteen minutes.
    #[serde(rename = "15m")]
    M15,
    /// One hour.
    #[serde(rename = "1h")]
    H1,
    /// Four hours.
    #[serde(rename = "4h")]
    H4,
    /// One day.
    #[serde(rename = "1d")]
    D1,
    /// One week, opening Monday 00:00 UTC.
    #[serde(rename = "1w")]
    W1,
}

/// 1970-01-05 was the first Monday after the epoch.
const WEEK_ANCHOR_SECS: i64 = 4 * 86_400;

impl Timeframe {
    /// Every timeframe, shortest first.
    pub const ALL: [Self; 6] = [Self::M5, Self::M15, Self::H1, Self::H4, Self::D1, Self::W1];

    /// Canonical label (`5m`, `15m`, `1h`, `4h`, `1d`, `1w`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
            Self::W1 => "1w",
        }
    }

    /// Length of one grid step in seconds.
    #[must_use]
    pub const fn step_secs(self) -> i64 {
        match self {
            Self::M5 => 300,
            Self::M15 => 900,
            Self::H1 => 3_600,
            Self::H4 => 14_400,
            Self::D1 => 86_400,
            Self::W1 => 604_800,
        }
    }

    /// Length of one grid step.
    #[must_use]
    pub const fn step(self) -> TimeDelta {
        TimeDelta::seconds(self.step_secs())
    }

    const fn anchor_secs(self) -> i64 {
        match self {
            Self::W1 => WEEK_ANCHOR_SECS,
            _ => 0,
        }
    }

    /// Returns true when `ts` lies exactly on this timeframe's grid.
    #[must_use]
    pub fn is_aligned(self, ts: DateTime<Utc>) -> bool {
        ts.timestamp_subsec_nanos() == 0
            && (ts.timestamp() - self.anchor_secs()).rem_euclid(self.step_secs()) == 0
    }

    /// Latest grid instant at or before `ts`.
    #[must_use]
    pub fn align_down(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let offset = (secs - self.anchor_secs()).rem_euclid(self.step_secs());
        DateTime::from_timestamp(secs - offset, 0).unwrap_or(ts)
    }

    /// Earliest grid instant at or after `ts`.
    #[must_use]
    pub fn align_up(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let down = self.align_down(ts);
        if down == ts { ts } else { down + self.step() }
    }

    /// Number of grid steps in `[start, end)`; zero when the range is empty.
    #[must_use]
    pub fn steps_between(self, start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
        let span = (end - start).num_seconds();
        if span <= 0 {
            return 0;
        }
        (span + self.step_secs() - 1) / self.step_secs()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = KlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| KlineError::InvalidArg(format!("unknown timeframe: {s}")))
    }
}

bitflags! {
    /// Set of timeframes, used for static adapter capability metadata.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TimeframeSet: u8 {
        /// 5m bars.
        const M5 = 1;
        /// 15m bars.
        const M15 = 1 << 1;
        /// 1h bars.
        const H1 = 1 << 2;
        /// 4h bars.
        const H4 = 1 << 3;
        /// 1d bars.
        const D1 = 1 << 4;
        /// 1w bars.
        const W1 = 1 << 5;
    }
}

impl TimeframeSet {
    /// Flag for a single timeframe.
    #[must_use]
    pub const fn of(tf: Timeframe) -> Self {
        match tf {
            Timeframe::M5 => Self::M5,
            Timeframe::M15 => Self::M15,
            Timeframe::H1 => Self::H1,
            Timeframe::H4 => Self::H4,
            Timeframe::D1 => Self::D1,
            Timeframe::W1 => Self::W1,
        }
    }

    /// Whether `tf` is a member of this set.
    #[must_use]
    pub const fn supports(self, tf: Timeframe) -> bool {
        self.contains(Self::of(tf))
    }

    /// Members in ascending order of step length.
    pub fn timeframes(self) -> impl Iterator<Item = Timeframe> {
        Timeframe::ALL.into_iter().filter(move |tf| self.supports(*tf))
    }
}

impl From<Timeframe> for TimeframeSet {
    fn from(tf: Timeframe) -> Self {
        Self::of(tf)
    }
}
