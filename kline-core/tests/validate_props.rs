use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use kline_core::{
    Candle, DataKind, Exchange, MarketType, Record, SeriesKey, TimeRange, Timeframe, validate,
};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn key() -> SeriesKey {
    SeriesKey::new(Exchange::Bybit, "ETHUSDT", MarketType::Futures, Timeframe::M15)
}

fn bar(slot: i64, close: i64) -> Record {
    Record::Candle(Candle {
        exchange: Exchange::Bybit,
        symbol: "ETHUSDT".into(),
        market_type: MarketType::Futures,
        timeframe: Timeframe::M15,
        open_time: base() + Timeframe::M15.step() * i32::try_from(slot).unwrap(),
        open: Decimal::from(10),
        high: Decimal::from(1_000),
        low: Decimal::from(1),
        close: Decimal::from(close),
        volume: Decimal::ZERO,
    })
}

proptest! {
    // Accepted slots plus gap slots cover the range exactly once.
    #[test]
    fn gaps_and_records_partition_the_range(
        slots in proptest::collection::vec((0i64..96, 2i64..500), 0..200),
    ) {
        let range = TimeRange::new(base(), base() + Timeframe::M15.step() * 96).unwrap();
        let series: Vec<Record> = slots.iter().map(|(s, c)| bar(*s, *c)).collect();
        let report = validate(&key(), DataKind::Candles, series, Some(range));

        let present: BTreeSet<i64> = slots.iter().map(|(s, _)| *s).collect();
        prop_assert_eq!(report.records.len(), present.len());

        let missing: i64 = report.gaps.iter().map(|g| g.missing()).sum();
        prop_assert_eq!(missing + i64::try_from(present.len()).unwrap(), 96);

        for w in report.records.windows(2) {
            prop_assert!(w[0].timestamp() < w[1].timestamp());
        }
    }

    // The surviving value at every slot is the last one fetched.
    #[test]
    fn latest_fetch_wins(slots in proptest::collection::vec((0i64..20, 2i64..500), 1..100)) {
        let series: Vec<Record> = slots.iter().map(|(s, c)| bar(*s, *c)).collect();
        let report = validate(&key(), DataKind::Candles, series, None);
        for rec in &report.records {
            let slot = (rec.timestamp() - base()).num_seconds() / Timeframe::M15.step_secs();
            let last = slots.iter().rev().find(|(s, _)| *s == slot).map(|(_, c)| *c).unwrap();
            prop_assert_eq!(rec.as_candle().unwrap().close, Decimal::from(last));
        }
        prop_assert!(report.conflicts.iter().all(|c| c.resolved));
    }
}
