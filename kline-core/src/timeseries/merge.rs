use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kline_types::{Record, TimeRange};

/// Merge record batches in fetch order (last is most recent).
///
/// - Records are keyed by timestamp; the most recent appearance wins.
/// - The result is sorted ascending.
///
/// Callers merge one series at a time; keys are not compared.
#[must_use]
pub fn merge_latest<I>(batches: I) -> Vec<Record>
where
    I: IntoIterator<Item = Vec<Record>>,
{
    let mut map: BTreeMap<DateTime<Utc>, Record> = BTreeMap::new();
    for batch in batches {
        for r in batch {
            map.insert(r.timestamp(), r);
        }
    }
    map.into_values().collect()
}

/// Keep only records inside `[range.start, range.end)`, preserving order.
///
/// Returns the kept records and whether any record lay at or beyond `range.end`
/// or before `range.start` (the page overran the job boundary).
#[must_use]
pub fn truncate_to_range(records: Vec<Record>, range: TimeRange) -> (Vec<Record>, bool) {
    let before = records.len();
    let kept: Vec<Record> = records
        .into_iter()
        .filter(|r| range.contains(r.timestamp()))
        .collect();
    let overran = kept.len() != before;
    (kept, overran)
}
