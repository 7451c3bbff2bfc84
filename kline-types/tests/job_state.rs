use chrono::{DateTime, TimeZone, Utc};
use kline_types::{
    Conflict, ConflictKind, Cursor, Direction, Exchange, FetchJob, Gap, JobEvent, JobId, JobRequest, JobState,
    KlineError, MarketType, TimeRange, Timeframe,
};

fn at(h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
}

fn job(direction: Direction) -> FetchJob {
    let range = TimeRange::new(at(0), at(10)).unwrap();
    let req = JobRequest::candles(Exchange::Binance, "btcusdt", MarketType::Spot, Timeframe::H1, range);
    FetchJob::new(JobId(1), None, req, direction, at(0))
}

#[test]
fn happy_path_transitions() {
    let mut j = job(Direction::Forward);
    assert_eq!(j.request.key.symbol, "BTCUSDT");
    j.apply(JobEvent::Started, at(0)).unwrap();
    assert_eq!(j.state, JobState::InProgress);
    j.apply(
        JobEvent::PageCommitted {
            next_cursor: Some(Cursor::Time(at(5))),
            persisted: 5,
            covered: Some(at(4)),
        },
        at(0),
    )
    .unwrap();
    assert_eq!(j.pages_fetched, 1);
    assert_eq!(j.records_persisted, 5);
    assert_eq!(j.last_covered, Some(at(4)));
    assert_eq!(j.cursor, Some(Cursor::Time(at(5))));
    j.apply(JobEvent::Completed, at(1)).unwrap();
    assert_eq!(j.state, JobState::Completed);
    assert_eq!(j.updated_at, at(1));
}

#[test]
fn terminal_states_reject_further_events() {
    let mut j = job(Direction::Forward);
    j.apply(JobEvent::Started, at(0)).unwrap();
    j.apply(JobEvent::Failed(KlineError::Cancelled), at(0)).unwrap();
    assert_eq!(j.state, JobState::Failed);
    let err = j.apply(JobEvent::Completed, at(0)).unwrap_err();
    assert!(matches!(err, KlineError::InvalidArg(_)));
    assert_eq!(j.failure.as_ref().unwrap().reason, KlineError::Cancelled);
}

#[test]
fn cannot_complete_with_open_gaps() {
    let mut j = job(Direction::Forward);
    j.apply(JobEvent::Started, at(0)).unwrap();
    let gap = Gap {
        key: j.request.key.clone(),
        kind: j.request.kind,
        start: at(3),
        end: at(5),
    };
    assert_eq!(gap.missing(), 2);
    j.apply(JobEvent::GapsDetected(vec![gap]), at(0)).unwrap();
    assert!(j.apply(JobEvent::Completed, at(0)).is_err());
    j.apply(JobEvent::GapsDetected(vec![]), at(0)).unwrap();
    j.apply(JobEvent::Completed, at(0)).unwrap();
}

#[test]
fn pages_require_started_job() {
    let mut j = job(Direction::Forward);
    let err = j
        .apply(
            JobEvent::PageCommitted {
                next_cursor: None,
                persisted: 0,
                covered: None,
            },
            at(0),
        )
        .unwrap_err();
    assert!(matches!(err, KlineError::InvalidArg(_)));
    assert_eq!(j.state, JobState::Pending);
}

#[test]
fn failure_carries_last_covered() {
    let mut j = job(Direction::Forward);
    j.apply(JobEvent::Started, at(0)).unwrap();
    j.apply(
        JobEvent::PageCommitted {
            next_cursor: Some(Cursor::Time(at(3))),
            persisted: 3,
            covered: Some(at(2)),
        },
        at(0),
    )
    .unwrap();
    j.apply(
        JobEvent::Failed(KlineError::malformed("binance", "bad shape")),
        at(0),
    )
    .unwrap();
    assert_eq!(j.failure.unwrap().last_covered, Some(at(2)));
}

#[test]
fn remaining_range_follows_direction() {
    let mut fwd = job(Direction::Forward);
    fwd.last_covered = Some(at(4));
    assert_eq!(fwd.remaining_range(), TimeRange::new(at(5), at(10)).unwrap());

    let mut back = job(Direction::Backward);
    back.apply(JobEvent::Started, at(0)).unwrap();
    for covered in [at(7), at(6)] {
        back.apply(
            JobEvent::PageCommitted {
                next_cursor: Some(Cursor::Time(covered)),
                persisted: 1,
                covered: Some(covered),
            },
            at(0),
        )
        .unwrap();
    }
    assert_eq!(back.last_covered, Some(at(6)));
    assert_eq!(back.remaining_range(), TimeRange::new(at(0), at(6)).unwrap());

    let untouched = job(Direction::Forward);
    assert_eq!(untouched.remaining_range(), untouched.request.range);
}

#[test]
fn resumed_walk_keeps_the_full_request_range() {
    let walk = TimeRange::new(at(5), at(10)).unwrap();
    let mut j = job(Direction::Forward).with_walk(walk);
    assert_eq!(j.walk_range(), walk);
    assert_eq!(j.remaining_range(), walk);
    assert_eq!(j.request.range, TimeRange::new(at(0), at(10)).unwrap());

    j.last_covered = Some(at(7));
    assert_eq!(j.remaining_range(), TimeRange::new(at(8), at(10)).unwrap());

    let round_trip: FetchJob = serde_json::from_str(&serde_json::to_string(&j).unwrap()).unwrap();
    assert_eq!(round_trip.walk, Some(walk));
}

#[test]
fn refetch_clears_matching_conflicts_only() {
    let mut j = job(Direction::Forward);
    j.apply(JobEvent::Started, at(0)).unwrap();
    let conflict = |ts| Conflict {
        key: j.request.key.clone(),
        kind: j.request.kind,
        timestamp: ts,
        class: ConflictKind::Invariant,
        detail: "high below open".into(),
        resolved: false,
    };
    let found = vec![conflict(at(2)), conflict(at(6))];
    j.apply(JobEvent::ConflictsObserved(found), at(0)).unwrap();
    assert_eq!(j.unresolved_conflicts().count(), 2);
    j.apply(JobEvent::ConflictsResolved(vec![at(2)]), at(0)).unwrap();
    let open: Vec<_> = j.unresolved_conflicts().map(|c| c.timestamp).collect();
    assert_eq!(open, vec![at(6)]);
    assert_eq!(j.conflicts.len(), 2);
}
