//! Deterministic synthetic series.
//!
//! Values depend only on the grid slot, so two fetches of the same bar agree unless
//! a test overrides them.

use chrono::{DateTime, Utc};
use kline_core::{Candle, DataKind, OpenInterestPoint, Record, SeriesKey, TimeRange};
use rust_decimal::Decimal;

fn slot(key: &SeriesKey, ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(key.timeframe.step_secs())
}

/// Synthetic bar opening at `ts`.
#[must_use]
pub fn candle(key: &SeriesKey, ts: DateTime<Utc>) -> Candle {
    let i = slot(key, ts);
    let open = Decimal::from(100 + i.rem_euclid(50));
    let close = open + Decimal::ONE;
    Candle {
        exchange: key.exchange,
        symbol: key.symbol.clone(),
        market_type: key.market_type,
        timeframe: key.timeframe,
        open_time: ts,
        open,
        high: close + Decimal::TWO,
        low: open - Decimal::TWO,
        close,
        volume: Decimal::from(10 + i.rem_euclid(7)),
    }
}

/// Synthetic open-interest snapshot at `ts`.
#[must_use]
pub fn open_interest(key: &SeriesKey, ts: DateTime<Utc>) -> OpenInterestPoint {
    OpenInterestPoint {
        exchange: key.exchange,
        symbol: key.symbol.clone(),
        market_type: key.market_type,
        timeframe: key.timeframe,
        timestamp: ts,
        value: Decimal::from(1_000 + slot(key, ts).rem_euclid(100)),
    }
}

/// Synthetic record of `kind` at `ts`.
#[must_use]
pub fn record(key: &SeriesKey, kind: DataKind, ts: DateTime<Utc>) -> Record {
    match kind {
        DataKind::Candles => candle(key, ts).into(),
        DataKind::OpenInterest => open_interest(key, ts).into(),
    }
}

/// Every grid slot of `range`, ascending.
#[must_use]
pub fn series(key: &SeriesKey, kind: DataKind, range: TimeRange) -> Vec<Record> {
    let tf = key.timeframe;
    let mut out = Vec::new();
    let mut ts = tf.align_up(range.start);
    while ts < range.end {
        out.push(record(key, kind, ts));
        ts += tf.step();
    }
    out
}

/// Same bar with its close (and the envelope) shifted by `delta`.
#[must_use]
pub fn revised(candle: &Candle, delta: i64) -> Candle {
    let d = Decimal::from(delta);
    Candle {
        close: candle.close + d,
        high: candle.high.max(candle.close + d),
        low: candle.low.min(candle.close + d),
        ..candle.clone()
    }
}
