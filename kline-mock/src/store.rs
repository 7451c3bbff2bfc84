use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use kline_core::{
    DataKind, FetchJob, JobId, JobStore, KlineError, Record, SeriesKey, Storage, TimeRange,
};

type Series = BTreeMap<DateTime<Utc>, Record>;

#[derive(Default)]
struct StoreState {
    series: HashMap<(SeriesKey, DataKind), Series>,
    upserts: usize,
    batches: Vec<Vec<DateTime<Utc>>>,
    fail_next: usize,
}

/// In-memory record store with upsert-by-natural-key semantics.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` upserts with a storage error.
    pub async fn fail_next_upserts(&self, n: usize) {
        self.state.lock().await.fail_next = n;
    }

    /// Successful upsert calls so far.
    pub async fn upsert_count(&self) -> usize {
        self.state.lock().await.upserts
    }

    /// Every stored record of one series, ascending.
    pub async fn snapshot(&self, key: &SeriesKey, kind: DataKind) -> Vec<Record> {
        self.state
            .lock()
            .await
            .series
            .get(&(key.clone(), kind))
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Timestamps of every successful upsert batch, in call order.
    pub async fn batches(&self) -> Vec<Vec<DateTime<Utc>>> {
        self.state.lock().await.batches.clone()
    }

    /// Total records across all series.
    pub async fn len(&self) -> usize {
        self.state.lock().await.series.values().map(BTreeMap::len).sum()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn upsert(&self, batch: Vec<Record>) -> Result<usize, KlineError> {
        let mut guard = self.state.lock().await;
        if guard.fail_next > 0 {
            guard.fail_next -= 1;
            return Err(KlineError::Storage("injected upsert failure".into()));
        }
        let n = batch.len();
        guard
            .batches
            .push(batch.iter().map(Record::timestamp).collect());
        for rec in batch {
            guard
                .series
                .entry((rec.key(), rec.kind()))
                .or_default()
                .insert(rec.timestamp(), rec);
        }
        guard.upserts += 1;
        Ok(n)
    }

    async fn query(
        &self,
        key: &SeriesKey,
        kind: DataKind,
        range: TimeRange,
    ) -> Result<Vec<Record>, KlineError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let guard = self.state.lock().await;
        Ok(guard
            .series
            .get(&(key.clone(), kind))
            .map(|s| s.range(range.start..range.end).map(|(_, r)| r.clone()).collect())
            .unwrap_or_default())
    }
}

/// In-memory job snapshot store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<BTreeMap<JobId, FetchJob>>,
}

impl MemoryJobStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with snapshots (as if left behind by a previous process).
    #[must_use]
    pub fn with_jobs(jobs: impl IntoIterator<Item = FetchJob>) -> Self {
        Self {
            jobs: Mutex::new(jobs.into_iter().map(|j| (j.id, j)).collect()),
        }
    }

    /// Stored snapshot for `id`.
    pub async fn get(&self, id: JobId) -> Option<FetchJob> {
        self.jobs.lock().await.get(&id).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &FetchJob) -> Result<(), KlineError> {
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<FetchJob>, KlineError> {
        Ok(self.jobs.lock().await.values().cloned().collect())
    }
}
