use async_trait::async_trait;

use kline_types::{DataKind, FetchJob, KlineError, Record, SeriesKey, TimeRange};

/// Persistence collaborator for canonical records.
///
/// Implementations must upsert by natural key `(exchange, symbol, market type,
/// timeframe, timestamp)` so replaying a batch is harmless.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write a batch atomically: either every record is stored or none is.
    ///
    /// Returns the number of records written.
    ///
    /// # Errors
    /// Returns `KlineError::Storage` when the backend rejects the batch.
    async fn upsert(&self, batch: Vec<Record>) -> Result<usize, KlineError>;

    /// Stored records of one series inside `range`, ascending by timestamp.
    ///
    /// # Errors
    /// Returns `KlineError::Storage` when the backend cannot be read.
    async fn query(
        &self,
        key: &SeriesKey,
        kind: DataKind,
        range: TimeRange,
    ) -> Result<Vec<Record>, KlineError>;
}

/// Durable job snapshots, used to resume work after a restart.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace the snapshot for `job.id`.
    ///
    /// # Errors
    /// Returns `KlineError::Storage` when the snapshot cannot be written.
    async fn save(&self, job: &FetchJob) -> Result<(), KlineError>;

    /// Every stored snapshot.
    ///
    /// # Errors
    /// Returns `KlineError::Storage` when the store cannot be read.
    async fn load_all(&self) -> Result<Vec<FetchJob>, KlineError>;
}
