use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use chrono::{DateTime, Utc};
use kline_types::{Conflict, ConflictKind, DataKind, Gap, Record, SeriesKey, TimeRange};

/// Outcome of validating one series.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Accepted records, ascending, one per timestamp.
    pub records: Vec<Record>,
    /// Records held back because they failed a per-record invariant.
    pub held: Vec<Record>,
    /// Missing grid slots.
    pub gaps: Vec<Gap>,
    /// Every conflict observed, resolved or not.
    pub conflicts: Vec<Conflict>,
}

impl ValidationReport {
    /// Conflicts policy could not settle.
    pub fn unresolved(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| !c.resolved)
    }

    /// Whether any conflict is unresolved.
    #[must_use]
    pub fn has_unresolved(&self) -> bool {
        self.unresolved().next().is_some()
    }
}

/// Validate a series given in fetch order.
///
/// - Off-grid timestamps and OHLC envelope violations become unresolved
///   conflicts; the record is held back rather than dropped silently.
/// - Duplicate timestamps with identical values merge silently.
/// - Duplicate timestamps with different values keep the most recently
///   fetched record and produce one resolved `DuplicateMismatch` conflict.
/// - Gaps are computed between consecutive accepted timestamps and, when
///   `range` is given, against both range edges.
pub fn validate<I>(
    key: &SeriesKey,
    kind: DataKind,
    records: I,
    range: Option<TimeRange>,
) -> ValidationReport
where
    I: IntoIterator<Item = Record>,
{
    let tf = key.timeframe;
    let mut accepted: BTreeMap<DateTime<Utc>, Record> = BTreeMap::new();
    let mut held = Vec::new();
    let mut conflicts = Vec::new();

    for rec in records {
        let ts = rec.timestamp();
        if !tf.is_aligned(ts) {
            conflicts.push(conflict(
                key,
                kind,
                ts,
                ConflictKind::Misaligned,
                format!("{ts} is not on the {tf} grid"),
                false,
            ));
            held.push(rec);
            continue;
        }
        if let Err(detail) = rec.check_invariants() {
            conflicts.push(conflict(key, kind, ts, ConflictKind::Invariant, detail, false));
            held.push(rec);
            continue;
        }
        match accepted.entry(ts) {
            Entry::Vacant(v) => {
                v.insert(rec);
            }
            Entry::Occupied(mut o) => {
                if o.get().same_values(&rec) {
                    continue;
                }
                let detail = format!("values differ between fetches; keeping latest {rec:?}");
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    target = "kline::validate",
                    series = %key,
                    %ts,
                    previous = ?o.get(),
                    latest = ?rec,
                    "duplicate timestamp with different values; most recent fetch wins"
                );
                conflicts.push(conflict(
                    key,
                    kind,
                    ts,
                    ConflictKind::DuplicateMismatch,
                    detail,
                    true,
                ));
                o.insert(rec);
            }
        }
    }

    let gaps = detect_gaps(key, kind, accepted.keys().copied(), range);
    ValidationReport {
        records: accepted.into_values().collect(),
        held,
        gaps,
        conflicts,
    }
}

/// Missing grid slots in an ascending run of timestamps.
///
/// With a `range`, slots between `range.start` and the first timestamp and between
/// the last timestamp and `range.end` count as gaps too, and an empty input yields
/// one gap spanning the whole range. Timestamps outside `range` are ignored.
pub fn detect_gaps<I>(
    key: &SeriesKey,
    kind: DataKind,
    timestamps: I,
    range: Option<TimeRange>,
) -> Vec<Gap>
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let step = key.timeframe.step();
    let mut gaps = Vec::new();
    let mut push = |start: DateTime<Utc>, end: DateTime<Utc>| {
        if start < end {
            gaps.push(Gap {
                key: key.clone(),
                kind,
                start,
                end,
            });
        }
    };

    let mut expected: Option<DateTime<Utc>> = range.map(|r| r.start);
    for ts in timestamps {
        if range.is_some_and(|r| !r.contains(ts)) {
            continue;
        }
        if let Some(next) = expected {
            if ts > next {
                push(next, ts);
            }
        }
        expected = Some(expected.map_or(ts + step, |e| e.max(ts + step)));
    }
    if let (Some(r), Some(next)) = (range, expected) {
        push(next, r.end);
    }
    gaps
}

fn conflict(
    key: &SeriesKey,
    kind: DataKind,
    timestamp: DateTime<Utc>,
    class: ConflictKind,
    detail: String,
    resolved: bool,
) -> Conflict {
    Conflict {
        key: key.clone(),
        kind,
        timestamp,
        class,
        detail,
        resolved,
    }
}
