use chrono::{DateTime, TimeZone, Utc};
use kline_core::{
    Candle, ConflictKind, DataKind, Exchange, MarketType, Record, SeriesKey, TimeRange, Timeframe,
    detect_gaps, merge_latest, truncate_to_range, validate,
};
use rust_decimal::Decimal;

fn at(h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
}

fn key() -> SeriesKey {
    SeriesKey::new(Exchange::Binance, "BTCUSDT", MarketType::Spot, Timeframe::H1)
}

fn bar(ts: DateTime<Utc>, close: i64) -> Record {
    Record::Candle(Candle {
        exchange: Exchange::Binance,
        symbol: "BTCUSDT".into(),
        market_type: MarketType::Spot,
        timeframe: Timeframe::H1,
        open_time: ts,
        open: Decimal::from(100),
        high: Decimal::from(200),
        low: Decimal::from(50),
        close: Decimal::from(close),
        volume: Decimal::from(1),
    })
}

#[test]
fn contiguous_series_has_no_findings() {
    let series: Vec<_> = (0..5).map(|h| bar(at(h), 110)).collect();
    let report = validate(&key(), DataKind::Candles, series.clone(), None);
    assert_eq!(report.records, series);
    assert!(report.gaps.is_empty());
    assert!(report.conflicts.is_empty());
}

#[test]
fn interior_hole_is_one_gap() {
    let series = vec![bar(at(0), 110), bar(at(1), 110), bar(at(4), 110)];
    let report = validate(&key(), DataKind::Candles, series, None);
    assert_eq!(report.gaps.len(), 1);
    let gap = &report.gaps[0];
    assert_eq!((gap.start, gap.end), (at(2), at(4)));
    assert_eq!(gap.missing(), 2);
}

#[test]
fn range_edges_count_as_gaps() {
    let range = TimeRange::new(at(0), at(6)).unwrap();
    let series = vec![bar(at(2), 110), bar(at(3), 110)];
    let report = validate(&key(), DataKind::Candles, series, Some(range));
    let spans: Vec<_> = report.gaps.iter().map(|g| (g.start, g.end)).collect();
    assert_eq!(spans, vec![(at(0), at(2)), (at(4), at(6))]);
}

#[test]
fn empty_series_is_one_gap_over_range() {
    let range = TimeRange::new(at(0), at(3)).unwrap();
    let gaps = detect_gaps(&key(), DataKind::Candles, Vec::new(), Some(range));
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].range(), range);
    assert!(detect_gaps(&key(), DataKind::Candles, Vec::new(), None).is_empty());
}

#[test]
fn identical_duplicates_merge_silently() {
    let series = vec![bar(at(0), 110), bar(at(1), 110), bar(at(1), 110)];
    let report = validate(&key(), DataKind::Candles, series, None);
    assert_eq!(report.records.len(), 2);
    assert!(report.conflicts.is_empty());
}

#[test]
fn differing_duplicate_keeps_latest_and_reports_once() {
    let series = vec![bar(at(0), 110), bar(at(1), 110), bar(at(1), 120)];
    let report = validate(&key(), DataKind::Candles, series, None);
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.conflicts.len(), 1);
    let c = &report.conflicts[0];
    assert_eq!(c.class, ConflictKind::DuplicateMismatch);
    assert!(c.resolved);
    assert_eq!(c.timestamp, at(1));
    assert_eq!(
        report.records[1].as_candle().unwrap().close,
        Decimal::from(120)
    );
    assert!(!report.has_unresolved());
}

#[test]
fn invariant_violations_are_held_back() {
    let mut broken = bar(at(1), 110);
    if let Record::Candle(c) = &mut broken {
        c.high = Decimal::from(90);
    }
    let report = validate(
        &key(),
        DataKind::Candles,
        vec![bar(at(0), 110), broken.clone(), bar(at(2), 110)],
        None,
    );
    assert_eq!(report.held, vec![broken]);
    assert!(report.has_unresolved());
    assert_eq!(report.conflicts[0].class, ConflictKind::Invariant);
    // The held slot is a hole in the accepted series.
    assert_eq!(report.gaps.len(), 1);
    assert_eq!(report.gaps[0].start, at(1));
}

#[test]
fn misaligned_timestamp_is_unresolved() {
    let off = bar(Utc.with_ymd_and_hms(2024, 1, 1, 1, 30, 0).unwrap(), 110);
    let report = validate(&key(), DataKind::Candles, vec![bar(at(0), 110), off], None);
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.unresolved().count(), 1);
    assert_eq!(report.conflicts[0].class, ConflictKind::Misaligned);
}

#[test]
fn merge_latest_prefers_later_batches() {
    let merged = merge_latest(vec![
        vec![bar(at(0), 110), bar(at(1), 110)],
        vec![bar(at(1), 130), bar(at(2), 110)],
    ]);
    assert_eq!(merged.len(), 3);
    assert_eq!(merged[1].as_candle().unwrap().close, Decimal::from(130));
}

#[test]
fn truncation_keeps_in_range_records() {
    let range = TimeRange::new(at(1), at(3)).unwrap();
    let (kept, overran) =
        truncate_to_range(vec![bar(at(0), 1), bar(at(1), 1), bar(at(2), 1), bar(at(3), 1)], range);
    assert_eq!(kept.len(), 2);
    assert!(overran);
    let (kept, overran) = truncate_to_range(kept, range);
    assert_eq!(kept.len(), 2);
    assert!(!overran);
}
