//! Per-job task: walk the range, validate and persist each page, then backfill gaps.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kline_core::{
    Direction, FetchJob, Gap, JobEvent, JobId, JobRequest, KlineError, Record, TimeRange,
    detect_gaps, validate,
};
use tokio::sync::watch;

use crate::core::Inner;
use crate::driver::{DrivenPage, PaginationDriver, cancelled};

pub(crate) async fn run(inner: Arc<Inner>, id: JobId, cancel: watch::Receiver<bool>) {
    let outcome = drive(&inner, id, cancel).await;
    let event = match outcome {
        Ok(()) => JobEvent::Completed,
        Err(err) => JobEvent::Failed(err),
    };
    match inner.transition(id, event).await {
        Ok(_job) => {
            #[cfg(feature = "tracing")]
            log_outcome(&_job);
        }
        Err(_err) => {
            // Already terminal: cancelled from outside while the worker wound down.
            #[cfg(feature = "tracing")]
            tracing::debug!(target = "kline::ingest", job = %id, error = %_err, "final transition skipped");
        }
    }
}

#[cfg(feature = "tracing")]
fn log_outcome(job: &FetchJob) {
    match &job.failure {
        None => tracing::info!(
            target = "kline::ingest",
            job = %job.id,
            series = %job.request.key,
            pages = job.pages_fetched,
            records = job.records_persisted,
            conflicts = job.conflicts.len(),
            "job completed"
        ),
        Some(failure) => tracing::warn!(
            target = "kline::ingest",
            job = %job.id,
            series = %job.request.key,
            reason = %failure.reason,
            last_covered = ?failure.last_covered,
            "job failed"
        ),
    }
}

async fn drive(
    inner: &Arc<Inner>,
    id: JobId,
    mut cancel: watch::Receiver<bool>,
) -> Result<(), KlineError> {
    let job = inner.transition(id, JobEvent::Started).await?;
    #[cfg(feature = "tracing")]
    tracing::info!(
        target = "kline::ingest",
        job = %id,
        series = %job.request.key,
        kind = %job.request.kind,
        range = %job.request.range,
        walk = %job.walk_range(),
        parent = ?job.parent,
        "job started"
    );
    let adapter = Arc::clone(inner.adapter(job.request.key.exchange)?);
    let walk = JobRequest {
        range: job.walk_range(),
        ..job.request.clone()
    };
    let mut driver = PaginationDriver::new(
        adapter,
        walk,
        job.direction,
        job.cursor.clone(),
        &inner.cfg,
        cancel.clone(),
    );
    while let Some(page) = driver.next_page().await? {
        commit(inner, &job, page, &cancel).await?;
    }

    let rounds = if job.parent.is_some() {
        0
    } else {
        inner.cfg.max_backfill_rounds
    };
    let mut round = 0;
    loop {
        let gaps = reconcile(inner, id, &job.request).await?;
        if gaps.is_empty() || round >= rounds {
            break;
        }
        round += 1;
        #[cfg(feature = "tracing")]
        tracing::info!(
            target = "kline::ingest",
            job = %id,
            round,
            gaps = gaps.len(),
            "backfilling gaps"
        );
        backfill(inner, id, gaps, &mut cancel).await?;
    }

    let job = inner.table.snapshot(id)?;
    let open = job.unresolved_conflicts().count();
    if open > 0 {
        return Err(KlineError::UnresolvedConflicts { count: open });
    }
    if !job.gaps.is_empty() {
        return Err(KlineError::UnresolvedGaps {
            count: job.gaps.len(),
        });
    }
    Ok(())
}

/// Validate one page against what storage already holds and persist it.
///
/// A page with unresolved conflicts is withheld whole; its slots surface as gaps
/// and are refetched by backfill.
async fn commit(
    inner: &Inner,
    job: &FetchJob,
    page: DrivenPage,
    cancel: &watch::Receiver<bool>,
) -> Result<(), KlineError> {
    let key = &job.request.key;
    let kind = job.request.kind;
    let next_cursor = page.next_cursor;

    let fetched: BTreeSet<DateTime<Utc>> = page.records.iter().map(Record::timestamp).collect();
    let (Some(first), Some(last)) = (fetched.first(), fetched.last()) else {
        inner
            .transition(
                job.id,
                JobEvent::PageCommitted {
                    next_cursor,
                    persisted: 0,
                    covered: None,
                },
            )
            .await?;
        return Ok(());
    };
    let tf = key.timeframe;
    let span = TimeRange {
        start: tf.align_down(*first),
        end: tf.align_down(*last) + tf.step(),
    };
    let existing = inner.storage.query(key, kind, span).await?;
    let report = validate(key, kind, existing.into_iter().chain(page.records), None);
    if !report.conflicts.is_empty() {
        inner
            .transition(job.id, JobEvent::ConflictsObserved(report.conflicts.clone()))
            .await?;
    }

    let (persisted, covered) = if report.has_unresolved() {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            target = "kline::ingest",
            job = %job.id,
            series = %key,
            page = page.number,
            unresolved = report.unresolved().count(),
            "page withheld; its interval will be refetched"
        );
        (0, None)
    } else {
        let batch: Vec<Record> = report
            .records
            .into_iter()
            .filter(|r| fetched.contains(&r.timestamp()))
            .collect();
        let covered = match job.direction {
            Direction::Forward => batch.last(),
            Direction::Backward => batch.first(),
        }
        .map(Record::timestamp);
        if *cancel.borrow() {
            return Err(KlineError::Cancelled);
        }
        let persisted = if batch.is_empty() {
            0
        } else {
            inner.storage.upsert(batch).await?
        };
        (persisted, covered)
    };

    inner
        .transition(
            job.id,
            JobEvent::PageCommitted {
                next_cursor,
                persisted,
                covered,
            },
        )
        .await?;
    Ok(())
}

/// Recompute gaps over the job range from storage and clear conflicts whose slots
/// now hold validated records.
async fn reconcile(
    inner: &Inner,
    id: JobId,
    request: &JobRequest,
) -> Result<Vec<Gap>, KlineError> {
    let key = &request.key;
    let stored: BTreeSet<DateTime<Utc>> = inner
        .storage
        .query(key, request.kind, request.range)
        .await?
        .iter()
        .map(Record::timestamp)
        .collect();

    let job = inner.table.snapshot(id)?;
    let refetched: Vec<DateTime<Utc>> = job
        .unresolved_conflicts()
        .map(|c| c.timestamp)
        .filter(|ts| stored.contains(&key.timeframe.align_down(*ts)))
        .collect();
    if !refetched.is_empty() {
        inner
            .transition(id, JobEvent::ConflictsResolved(refetched))
            .await?;
    }

    let gaps = detect_gaps(key, request.kind, stored, Some(request.range));
    inner
        .transition(id, JobEvent::GapsDetected(gaps.clone()))
        .await?;
    Ok(gaps)
}

/// Spawn one child job per gap and wait for all of them.
async fn backfill(
    inner: &Arc<Inner>,
    id: JobId,
    gaps: Vec<Gap>,
    cancel: &mut watch::Receiver<bool>,
) -> Result<(), KlineError> {
    let mut children = Vec::with_capacity(gaps.len());
    for gap in gaps {
        let request = JobRequest {
            range: gap.range(),
            key: gap.key,
            kind: gap.kind,
        };
        children.push(inner.launch(request, Some(id), None).await?);
    }
    let all = futures::future::join_all(children.iter().map(|c| inner.table.wait(*c)));
    tokio::select! {
        biased;
        () = cancelled(cancel) => Err(KlineError::Cancelled),
        done = all => {
            for child in done {
                let child = child?;
                if let Some(_failure) = &child.failure {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        target = "kline::ingest",
                        job = %id,
                        child = %child.id,
                        reason = %_failure.reason,
                        "backfill child failed"
                    );
                }
            }
            Ok(())
        }
    }
}
