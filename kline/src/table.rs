use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use kline_core::{FetchJob, JobEvent, JobId, KlineError};
use tokio::sync::watch;

struct Entry {
    snapshot: watch::Sender<FetchJob>,
    cancel: watch::Sender<bool>,
    /// Held across a transition and its job-store save.
    save: Arc<tokio::sync::Mutex<()>>,
}

/// Live and archived jobs of one orchestrator.
///
/// The mutex only guards the map; snapshots are published through watch channels
/// so waiters never hold it. Each entry carries an async guard that orders its
/// job-store saves.
pub(crate) struct JobTable {
    next_id: AtomicU64,
    entries: Mutex<HashMap<JobId, Entry>>,
}

impl JobTable {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn allocate(&self) -> JobId {
        JobId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Ensure future ids are greater than `id`.
    pub(crate) fn reserve_above(&self, id: JobId) {
        self.next_id.fetch_max(id.0.saturating_add(1), Ordering::Relaxed);
    }

    /// Register `job`, returning the receiver its worker watches for cancellation.
    pub(crate) fn insert(&self, job: FetchJob) -> watch::Receiver<bool> {
        let id = job.id;
        let (snapshot, _) = watch::channel(job);
        let (cancel, cancel_rx) = watch::channel(false);
        self.lock().insert(
            id,
            Entry {
                snapshot,
                cancel,
                save: Arc::new(tokio::sync::Mutex::new(())),
            },
        );
        cancel_rx
    }

    pub(crate) fn contains(&self, id: JobId) -> bool {
        self.lock().contains_key(&id)
    }

    pub(crate) fn snapshot(&self, id: JobId) -> Result<FetchJob, KlineError> {
        self.with_entry(id, |e| e.snapshot.borrow().clone())
    }

    pub(crate) fn all(&self) -> Vec<FetchJob> {
        let mut jobs: Vec<FetchJob> = self
            .lock()
            .values()
            .map(|e| e.snapshot.borrow().clone())
            .collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// Apply `event` and publish the new snapshot.
    pub(crate) fn apply(
        &self,
        id: JobId,
        event: JobEvent,
        now: DateTime<Utc>,
    ) -> Result<FetchJob, KlineError> {
        self.with_entry(id, |e| {
            let mut outcome = Ok(());
            e.snapshot.send_if_modified(|job| match job.apply(event, now) {
                Ok(()) => true,
                Err(err) => {
                    outcome = Err(err);
                    false
                }
            });
            outcome.map(|()| e.snapshot.borrow().clone())
        })?
    }

    pub(crate) fn save_guard(&self, id: JobId) -> Result<Arc<tokio::sync::Mutex<()>>, KlineError> {
        self.with_entry(id, |e| Arc::clone(&e.save))
    }

    pub(crate) fn signal_cancel(&self, id: JobId) -> Result<(), KlineError> {
        self.with_entry(id, |e| {
            e.cancel.send_replace(true);
        })
    }

    /// Resolve with the terminal snapshot of `id`.
    pub(crate) async fn wait(&self, id: JobId) -> Result<FetchJob, KlineError> {
        let mut rx = self.with_entry(id, |e| e.snapshot.subscribe())?;
        let job = rx
            .wait_for(|job| job.state.is_terminal())
            .await
            .map_err(|_| KlineError::not_found(format!("{id} (table dropped)")))?
            .clone();
        Ok(job)
    }

    fn with_entry<R>(&self, id: JobId, f: impl FnOnce(&Entry) -> R) -> Result<R, KlineError> {
        let entries = self.lock();
        entries
            .get(&id)
            .map(f)
            .ok_or_else(|| KlineError::not_found(id.to_string()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
