use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kline_core::{
    Exchange, ExchangeAdapter, FetchJob, IngestConfig, JobEvent, JobId, JobRequest, JobStore,
    KlineError, RetryConfig, Storage, TimeRange, ensure_supported,
};
use kline_middleware::{RateLimiterRegistry, ThrottledAdapter};

use crate::table::JobTable;
use crate::worker;

/// Orchestrator that runs ingestion jobs against registered exchange adapters.
///
/// Each submitted job runs on its own tokio task. Adapters are wrapped so every page
/// fetch is admitted by the shared rate limiter of its `(exchange, endpoint-class)`.
pub struct Ingestor {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) adapters: HashMap<Exchange, Arc<dyn ExchangeAdapter>>,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) job_store: Option<Arc<dyn JobStore>>,
    pub(crate) limiters: Arc<RateLimiterRegistry>,
    pub(crate) cfg: IngestConfig,
    pub(crate) table: JobTable,
}

/// Builder for constructing an [`Ingestor`].
pub struct IngestorBuilder {
    adapters: Vec<Arc<dyn ExchangeAdapter>>,
    storage: Option<Arc<dyn Storage>>,
    job_store: Option<Arc<dyn JobStore>>,
    limiters: RateLimiterRegistry,
    cfg: IngestConfig,
}

impl Default for IngestorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestorBuilder {
    /// Builder with default [`IngestConfig`] and each exchange's published rate limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
            storage: None,
            job_store: None,
            limiters: RateLimiterRegistry::new(),
            cfg: IngestConfig::default(),
        }
    }

    /// Register an exchange adapter. One adapter per exchange.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ExchangeAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Register the HTTP adapters of every supported exchange.
    ///
    /// # Errors
    /// Returns `InvalidArg` when an HTTP client cannot be built.
    #[cfg(feature = "exchanges")]
    pub fn with_production_adapters(mut self) -> Result<Self, KlineError> {
        self.adapters.extend(kline_exchanges::production_adapters()?);
        Ok(self)
    }

    /// Storage that receives validated records (required).
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Durable job snapshots, enabling [`Ingestor::recover`].
    #[must_use]
    pub fn job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.job_store = Some(store);
        self
    }

    /// Replace the rate-limit configuration.
    #[must_use]
    pub fn rate_limits(mut self, limiters: RateLimiterRegistry) -> Self {
        self.limiters = limiters;
        self
    }

    /// Replace the whole ingestion configuration.
    #[must_use]
    pub fn config(mut self, cfg: IngestConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Backoff for transient page failures.
    #[must_use]
    pub const fn retry(mut self, retry: RetryConfig) -> Self {
        self.cfg.retry = retry;
        self
    }

    /// Deadline for one exchange call, excluding the wait for rate-limit admission.
    #[must_use]
    pub const fn call_timeout(mut self, timeout: Duration) -> Self {
        self.cfg.call_timeout = timeout;
        self
    }

    /// Suspension after a rate-limit signal without a retry hint.
    #[must_use]
    pub const fn rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.cfg.rate_limit_cooldown = cooldown;
        self
    }

    /// How many rounds of backfill a job runs for gaps found after its walk.
    #[must_use]
    pub const fn max_backfill_rounds(mut self, rounds: u32) -> Self {
        self.cfg.max_backfill_rounds = rounds;
        self
    }

    /// Whether job ranges are clamped to bars that have already closed.
    #[must_use]
    pub const fn closed_bars_only(mut self, yes: bool) -> Self {
        self.cfg.closed_bars_only = yes;
        self
    }

    /// Build the orchestrator.
    ///
    /// # Errors
    /// Returns `InvalidArg` when no adapter or no storage is registered, or when two
    /// adapters serve the same exchange.
    pub fn build(self) -> Result<Ingestor, KlineError> {
        if self.adapters.is_empty() {
            return Err(KlineError::InvalidArg(
                "no adapters registered; add at least one via with_adapter(...)".to_string(),
            ));
        }
        let storage = self.storage.ok_or_else(|| {
            KlineError::InvalidArg("no storage registered; set one via storage(...)".to_string())
        })?;
        let limiters = Arc::new(self.limiters);
        let mut adapters: HashMap<Exchange, Arc<dyn ExchangeAdapter>> = HashMap::new();
        for adapter in self.adapters {
            let exchange = adapter.exchange();
            let throttled = ThrottledAdapter::new(adapter, Arc::clone(&limiters))
                .with_call_timeout(self.cfg.call_timeout);
            if adapters.insert(exchange, Arc::new(throttled)).is_some() {
                return Err(KlineError::InvalidArg(format!(
                    "more than one adapter registered for {exchange}"
                )));
            }
        }
        Ok(Ingestor {
            inner: Arc::new(Inner {
                adapters,
                storage,
                job_store: self.job_store,
                limiters,
                cfg: self.cfg,
                table: JobTable::new(),
            }),
        })
    }
}

impl Ingestor {
    /// Start building an orchestrator.
    #[must_use]
    pub fn builder() -> IngestorBuilder {
        IngestorBuilder::new()
    }

    /// Accept a job and start it on its own task.
    ///
    /// The range is snapped to the timeframe grid and, with `closed_bars_only`, its end
    /// is clamped to the opening of the still-forming bar.
    ///
    /// # Errors
    /// `Unsupported` when no adapter serves the exchange or the adapter lacks the
    /// requested kind, market, or timeframe; `InvalidArg` when the range holds no bars.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId, KlineError> {
        let adapter = self.inner.adapter(request.key.exchange)?;
        ensure_supported(adapter.capabilities(), &request)?;
        let tf = request.key.timeframe;
        let mut range = request.range.aligned(tf);
        if self.inner.cfg.closed_bars_only {
            range = range.clamp_end(tf.align_down(Utc::now()));
        }
        if range.is_empty() {
            return Err(KlineError::InvalidArg(format!(
                "range {} holds no closed {tf} bars",
                request.range
            )));
        }
        self.inner
            .launch(JobRequest { range, ..request }, None, None)
            .await
    }

    /// Snapshot of one job.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids.
    pub fn status(&self, id: JobId) -> Result<FetchJob, KlineError> {
        self.inner.table.snapshot(id)
    }

    /// Cancel a job and its backfill children.
    ///
    /// Unfinished jobs fail with `Cancelled`; their workers stop at the next
    /// suspension point and discard in-flight pages. Finished jobs are left as they
    /// are. Returns the job's snapshot.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids.
    pub async fn cancel(&self, id: JobId) -> Result<FetchJob, KlineError> {
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let job = self.inner.table.snapshot(current)?;
            pending.extend(job.children.iter().copied());
            if job.state.is_terminal() {
                continue;
            }
            self.inner.table.signal_cancel(current)?;
            // The worker may record the cancellation first.
            if let Err(_err) = self
                .inner
                .transition(current, JobEvent::Failed(KlineError::Cancelled))
                .await
            {
                #[cfg(feature = "tracing")]
                tracing::debug!(target = "kline::ingest", job = %current, error = %_err, "job finished before cancel");
            }
        }
        self.status(id)
    }

    /// Resolve with the job's terminal snapshot.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids.
    pub async fn wait(&self, id: JobId) -> Result<FetchJob, KlineError> {
        self.inner.table.wait(id).await
    }

    /// Every job known to this orchestrator, ordered by id.
    #[must_use]
    pub fn jobs(&self) -> Vec<FetchJob> {
        self.inner.table.all()
    }

    /// Reload jobs from the job store and resume interrupted ones.
    ///
    /// Finished jobs are kept read-only. Each unfinished root job is resubmitted: its
    /// replacement pages through the part of the range after the last persisted
    /// timestamp, then checks and backfills the whole original range, so withheld pages
    /// and gaps that were still open are fetched again. The old job fails with
    /// `Superseded`. Unfinished backfill children are absorbed by their parent's
    /// replacement. Returns the ids of the new jobs.
    ///
    /// # Errors
    /// Returns `Storage` when the job store cannot be read or written.
    pub async fn recover(&self) -> Result<Vec<JobId>, KlineError> {
        let Some(store) = &self.inner.job_store else {
            return Ok(Vec::new());
        };
        let mut loaded = store.load_all().await?;
        if let Some(max) = loaded.iter().map(|j| j.id).max() {
            self.inner.table.reserve_above(max);
        }
        loaded.sort_by_key(|j| (j.parent.is_some(), j.id));

        let mut replaced: HashMap<JobId, JobId> = HashMap::new();
        let mut resumed = Vec::new();
        for job in loaded {
            let old = job.id;
            if self.inner.table.contains(old) {
                continue;
            }
            if job.state.is_terminal() {
                self.inner.table.insert(job);
                continue;
            }
            let replacement = match job.parent.and_then(|p| replaced.get(&p).copied()) {
                Some(parent_replacement) => parent_replacement,
                None => {
                    let walk = job.remaining_range();
                    let new = self
                        .inner
                        .launch(job.request.clone(), None, Some(walk))
                        .await?;
                    resumed.push(new);
                    new
                }
            };
            #[cfg(feature = "tracing")]
            tracing::info!(
                target = "kline::ingest",
                job = %old,
                replacement = %replacement,
                last_covered = ?job.last_covered,
                open_gaps = job.gaps.len(),
                "resuming interrupted job"
            );
            replaced.insert(old, replacement);
            self.inner.table.insert(job);
            self.inner
                .transition(
                    old,
                    JobEvent::Failed(KlineError::Superseded {
                        replacement: replacement.0,
                    }),
                )
                .await?;
        }
        Ok(resumed)
    }

    /// Shared rate limiters used by every adapter of this orchestrator.
    #[must_use]
    pub fn rate_limiters(&self) -> &Arc<RateLimiterRegistry> {
        &self.inner.limiters
    }
}

impl Inner {
    pub(crate) fn adapter(&self, exchange: Exchange) -> Result<&Arc<dyn ExchangeAdapter>, KlineError> {
        self.adapters
            .get(&exchange)
            .ok_or_else(|| KlineError::unsupported(format!("{exchange} (no adapter registered)")))
    }

    /// Register, persist, and start a job whose page walk covers `walk` (or the whole
    /// request range).
    pub(crate) async fn launch(
        self: &Arc<Self>,
        request: JobRequest,
        parent: Option<JobId>,
        walk: Option<TimeRange>,
    ) -> Result<JobId, KlineError> {
        let (id, cancel) = self.register(request, parent, walk)?;
        if let Some(parent) = parent
            && let Err(err) = self.transition(parent, JobEvent::ChildSpawned(id)).await
        {
            // Parent already finished (cancelled); never start the orphan.
            self.transition(id, JobEvent::Failed(KlineError::Cancelled))
                .await?;
            return Err(err);
        }
        self.save(id).await?;
        self.start(id, cancel);
        Ok(id)
    }

    fn register(
        &self,
        request: JobRequest,
        parent: Option<JobId>,
        walk: Option<TimeRange>,
    ) -> Result<(JobId, tokio::sync::watch::Receiver<bool>), KlineError> {
        let adapter = self.adapter(request.key.exchange)?;
        let direction = adapter
            .capabilities()
            .for_kind(request.kind)
            .map(|k| k.direction)
            .unwrap_or_default();
        let id = self.table.allocate();
        let mut job = FetchJob::new(id, parent, request, direction, Utc::now());
        if let Some(walk) = walk {
            job = job.with_walk(walk);
        }
        let cancel = self.table.insert(job);
        Ok((id, cancel))
    }

    fn start(self: &Arc<Self>, id: JobId, cancel: tokio::sync::watch::Receiver<bool>) {
        tokio::spawn(worker::run(Arc::clone(self), id, cancel));
    }

    /// Apply `event` to job `id` and save the new snapshot.
    ///
    /// The job's save guard is held from the update until the store returns, so
    /// snapshots reach the store in the order they were produced.
    pub(crate) async fn transition(
        &self,
        id: JobId,
        event: JobEvent,
    ) -> Result<FetchJob, KlineError> {
        let guard = self.table.save_guard(id)?;
        let _saving = guard.lock().await;
        let job = self.table.apply(id, event, Utc::now())?;
        self.persist(&job).await?;
        Ok(job)
    }

    /// Save the current snapshot of job `id`.
    async fn save(&self, id: JobId) -> Result<(), KlineError> {
        let guard = self.table.save_guard(id)?;
        let _saving = guard.lock().await;
        let job = self.table.snapshot(id)?;
        self.persist(&job).await
    }

    async fn persist(&self, job: &FetchJob) -> Result<(), KlineError> {
        match &self.job_store {
            Some(store) => store.save(job).await,
            None => Ok(()),
        }
    }
}
