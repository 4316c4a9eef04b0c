//! Pipeline orchestrator: extract, transform, load and commit per entity,
//! with backoff between runs.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use searchsync_state::{CheckpointStore, CommitOutcome};
use searchsync_types::document::Document;

use crate::checkpoint;
use crate::config::types::{EntityConfig, OnLoadError, PipelineConfig};
use crate::errors::{compute_backoff, PipelineError};
use crate::extract::{Extractor, PostgresExtractor};
use crate::load::{ElasticsearchLoader, Loader};
use crate::resolve::open_checkpoint_store;
use crate::result::{CycleOutcome, EntityReport, ItemFailure, RunSummary};
use crate::schema::IndexSchema;
use crate::transform::transform;

/// Where the pipeline currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Extracting,
    Transforming,
    Loading,
    Committing,
    /// Waiting to retry after a transient fault.
    Backoff,
    /// Stopped on an unrecoverable fault.
    Fatal,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::Transforming => "transforming",
            Self::Loading => "loading",
            Self::Committing => "committing",
            Self::Backoff => "backoff",
            Self::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Options for [`Pipeline::run_forever`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after this many runs.
    pub max_runs: Option<u64>,
}

/// Totals across [`Pipeline::run_forever`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub runs: u64,
    pub failed_runs: u64,
    pub documents_loaded: usize,
}

/// Opens the checkpoint store. Runs on the blocking pool.
pub type StoreOpener = Arc<dyn Fn() -> anyhow::Result<Arc<dyn CheckpointStore>> + Send + Sync>;

enum StoreSlot {
    Open(Arc<dyn CheckpointStore>),
    /// Not reachable yet; retried at the start of every run.
    Deferred(StoreOpener),
}

/// One configured pipeline with its collaborators.
pub struct Pipeline<E, L> {
    config: Arc<PipelineConfig>,
    extractor: E,
    loader: L,
    store: StoreSlot,
    state: PipelineState,
    prepared_indices: HashSet<String>,
}

impl<E: Extractor, L: Loader> Pipeline<E, L> {
    pub fn new(
        config: PipelineConfig,
        extractor: E,
        loader: L,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self::with_slot(config, extractor, loader, StoreSlot::Open(store))
    }

    /// Like [`Pipeline::new`], but the store is opened by the first run that
    /// needs it. Until `opener` succeeds every run fails with
    /// [`PipelineError::CheckpointUnavailable`].
    pub fn with_store_opener(config: PipelineConfig, extractor: E, loader: L, opener: StoreOpener) -> Self {
        Self::with_slot(config, extractor, loader, StoreSlot::Deferred(opener))
    }

    fn with_slot(config: PipelineConfig, extractor: E, loader: L, store: StoreSlot) -> Self {
        Self {
            config: Arc::new(config),
            extractor,
            loader,
            store,
            state: PipelineState::Idle,
            prepared_indices: HashSet::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn into_loader(self) -> L {
        self.loader
    }

    fn transition(&mut self, next: PipelineState) {
        if self.state != next {
            tracing::trace!(from = %self.state, to = %next, "Pipeline state");
            self.state = next;
        }
    }

    fn io_timeout(&self) -> Duration {
        self.config.resources.io_timeout()
    }

    async fn checkpoint_store(&mut self) -> Result<Arc<dyn CheckpointStore>, PipelineError> {
        let opener = match &self.store {
            StoreSlot::Open(store) => return Ok(Arc::clone(store)),
            StoreSlot::Deferred(opener) => Arc::clone(opener),
        };
        let store = checkpoint::open_store(opener, self.io_timeout()).await?;
        tracing::info!(backend = store.backend_name(), "Checkpoint store opened");
        self.store = StoreSlot::Open(Arc::clone(&store));
        Ok(store)
    }

    fn fail(&mut self, err: PipelineError) -> PipelineError {
        self.transition(if err.is_transient() {
            PipelineState::Backoff
        } else {
            PipelineState::Fatal
        });
        err
    }

    /// One pass over every entity in configuration order.
    ///
    /// An entity with nothing new doesn't stop the others; any fault aborts
    /// the rest of the run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CheckpointUnavailable`] if the store can't be
    /// opened, otherwise the first [`PipelineError`] raised by an entity cycle.
    pub async fn run_once(&mut self) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let config = Arc::clone(&self.config);
        let mut summary = RunSummary::default();

        let store = match self.checkpoint_store().await {
            Ok(store) => store,
            Err(err) => return Err(self.fail(err)),
        };

        for entity in &config.entities {
            match self.run_entity(entity, &store).await {
                Ok(outcome) => summary.entities.push(EntityReport {
                    entity: entity.name.clone(),
                    outcome,
                }),
                Err(err) => return Err(self.fail(err)),
            }
        }

        self.transition(PipelineState::Idle);
        summary.duration_secs = started.elapsed().as_secs_f64();
        tracing::info!(
            pipeline = config.pipeline.as_str(),
            entities = summary.entities.len(),
            documents = summary.documents_loaded(),
            failed = summary.documents_failed(),
            idle = summary.is_idle(),
            duration_secs = summary.duration_secs,
            "Run complete"
        );
        Ok(summary)
    }

    async fn ensure_index(&mut self, entity: &EntityConfig) -> Result<(), PipelineError> {
        let index = entity.index_name();
        if self.prepared_indices.contains(index) {
            return Ok(());
        }
        let schema = IndexSchema::for_kind(entity.kind);
        let timeout = self.io_timeout();
        bounded(timeout, self.loader.ensure_index(index, &schema), || {
            PipelineError::IndexUnavailable(format!("ensure index '{index}': timed out"))
        })
        .await?;
        self.prepared_indices.insert(index.to_string());
        Ok(())
    }

    async fn run_entity(
        &mut self,
        entity: &EntityConfig,
        store: &Arc<dyn CheckpointStore>,
    ) -> Result<CycleOutcome, PipelineError> {
        let name = entity.name.as_str();
        let timeout = self.io_timeout();

        self.ensure_index(entity).await?;

        let previous = checkpoint::read_watermark(store, entity, timeout).await?;

        self.transition(PipelineState::Extracting);
        let rows = bounded(timeout, self.extractor.extract(entity, &previous), || {
            PipelineError::SourceUnavailable(format!("extract '{name}': timed out"))
        })
        .await?;

        self.transition(PipelineState::Transforming);
        let batch = match transform(entity, &previous, rows) {
            Ok(batch) => batch,
            Err(PipelineError::NoNewData { .. }) => {
                tracing::debug!(entity = name, watermark = %previous, "No new data");
                self.transition(PipelineState::Idle);
                return Ok(CycleOutcome::NoNewData);
            }
            Err(err) => return Err(err),
        };

        let mut documents: Vec<Document> = Vec::with_capacity(batch.len());
        let mut row_failures = Vec::new();
        for result in batch.documents() {
            match result {
                Ok(doc) => documents.push(doc),
                Err(err) => {
                    tracing::warn!(
                        entity = name,
                        id = err.document_id().unwrap_or("?"),
                        error = %err,
                        "Skipping unparseable row group"
                    );
                    row_failures.push(ItemFailure::from(err));
                }
            }
        }

        self.transition(PipelineState::Loading);
        let index = entity.index_name();
        let mut outcome = bounded(timeout, self.loader.load(index, &documents), || {
            PipelineError::IndexUnavailable(format!("bulk into '{index}': timed out"))
        })
        .await?;

        if !outcome.is_complete() {
            let first_reason = outcome
                .failures
                .first()
                .map(|f| format!("{} ({})", f.reason, f.id))
                .unwrap_or_default();
            match self.config.resources.on_load_error {
                OnLoadError::Fail => {
                    return Err(PipelineError::PartialLoad {
                        index: index.to_string(),
                        attempted: documents.len(),
                        failed: outcome.failed,
                        first_reason,
                    });
                }
                OnLoadError::Skip => {
                    tracing::warn!(
                        entity = name,
                        failed = outcome.failed,
                        first_reason = first_reason.as_str(),
                        "Index rejected documents, skipping them"
                    );
                }
            }
        }
        for failure in row_failures {
            outcome.record_failure(failure);
        }

        self.transition(PipelineState::Committing);
        let watermark = batch.next_watermark().clone();
        let commit = checkpoint::write_watermark(store, entity, &watermark, timeout).await?;
        if let CommitOutcome::Regressed { stored } = &commit {
            tracing::warn!(entity = name, stored = %stored, candidate = %watermark, "Watermark not advanced");
        }

        tracing::info!(
            entity = name,
            rows = batch.rows_in(),
            documents = outcome.succeeded,
            failed = outcome.failed,
            watermark = %watermark,
            malformed = batch.is_malformed(),
            "Entity cycle complete"
        );
        self.transition(PipelineState::Idle);

        Ok(CycleOutcome::Loaded {
            documents: outcome.succeeded,
            failed: outcome.failed,
            watermark,
            commit,
            malformed: batch.is_malformed(),
        })
    }

    /// Run until `shutdown` turns `true` (or `options.max_runs` is reached),
    /// sleeping before every run with exponential backoff.
    ///
    /// The backoff attempt resets only after a run that loaded documents and
    /// advanced a watermark. Failed runs, idle runs and runs that reloaded a
    /// batch without moving its watermark all grow it.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient [`PipelineError`].
    pub async fn run_forever(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
        options: RunOptions,
    ) -> Result<RunStats, PipelineError> {
        let policy = self.config.backoff.policy();
        let mut attempt = 0u32;
        let mut stats = RunStats::default();

        loop {
            if *shutdown.borrow() {
                break;
            }
            let delay = compute_backoff(&policy, attempt);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = shutdown_requested(&mut shutdown) => break,
            }

            stats.runs += 1;
            match self.run_once().await {
                Ok(summary) => {
                    stats.documents_loaded += summary.documents_loaded();
                    if summary.made_progress() {
                        attempt = 0;
                    } else {
                        attempt = attempt.saturating_add(1);
                    }
                }
                Err(err) if err.is_transient() => {
                    stats.failed_runs += 1;
                    #[allow(clippy::cast_possible_truncation)]
                    let delay_ms = compute_backoff(&policy, attempt + 1).as_millis() as u64;
                    tracing::warn!(
                        attempt,
                        delay_ms,
                        error_kind = err.kind(),
                        error = %err,
                        "Run failed, will retry"
                    );
                    attempt = attempt.saturating_add(1);
                }
                Err(err) => {
                    tracing::error!(error_kind = err.kind(), error = %err, "Unrecoverable error, stopping pipeline");
                    return Err(err);
                }
            }

            if options.max_runs.is_some_and(|max| stats.runs >= max) {
                break;
            }
        }

        self.transition(PipelineState::Idle);
        tracing::info!(
            runs = stats.runs,
            failed_runs = stats.failed_runs,
            documents = stats.documents_loaded,
            "Pipeline stopped"
        );
        Ok(stats)
    }
}

/// Resolves once the flag is set. A dropped sender never requests shutdown.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

async fn bounded<T, F>(
    timeout: Duration,
    fut: F,
    on_timeout: impl FnOnce() -> PipelineError,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or_else(|_| Err(on_timeout()))
}

// ---------------------------------------------------------------------------
// Wiring for the real backends
// ---------------------------------------------------------------------------

/// The production pipeline: `PostgreSQL` in, Elasticsearch out.
pub type SearchSyncPipeline = Pipeline<PostgresExtractor, ElasticsearchLoader>;

/// Build the production pipeline from a validated configuration.
///
/// Nothing is connected yet: the checkpoint store is opened by the first run,
/// so a state backend that is down at startup is retried like any other
/// outage.
///
/// # Errors
///
/// Returns an error if the HTTP client can't be built.
pub fn build_pipeline(config: PipelineConfig) -> anyhow::Result<SearchSyncPipeline> {
    let state = config.state.clone();
    let opener: StoreOpener = Arc::new(move || open_checkpoint_store(&state));
    let extractor = PostgresExtractor::new(&config.source, config.resources.batch_size);
    let loader = ElasticsearchLoader::new(&config.index, config.resources.io_timeout())?;
    tracing::info!(
        pipeline = config.pipeline.as_str(),
        entities = config.entities.len(),
        state_backend = ?config.state.backend,
        "Pipeline ready"
    );
    Ok(Pipeline::with_store_opener(config, extractor, loader, opener))
}

/// Connectivity report for `check`.
#[derive(Debug, Clone, Default)]
pub struct CheckResult {
    pub state_ok: bool,
    pub source_ok: bool,
    pub index_ok: bool,
}

impl CheckResult {
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.state_ok && self.source_ok && self.index_ok
    }
}

/// Probe the checkpoint store, the source and the index.
pub async fn check_pipeline(config: &PipelineConfig) -> CheckResult {
    let timeout = config.resources.io_timeout();
    let mut result = CheckResult::default();

    let state = config.state.clone();
    let store = tokio::task::spawn_blocking(move || open_checkpoint_store(&state)).await;
    match store {
        Ok(Ok(store)) => match checkpoint::ping(&store, timeout).await {
            Ok(()) => {
                tracing::info!(backend = store.backend_name(), "Checkpoint store: OK");
                result.state_ok = true;
            }
            Err(e) => tracing::error!(error = %e, "Checkpoint store: FAILED"),
        },
        Ok(Err(e)) => tracing::error!(error = %format_args!("{e:#}"), "Checkpoint store: FAILED"),
        Err(e) => tracing::error!(error = %e, "Checkpoint store: FAILED"),
    }

    let mut extractor = PostgresExtractor::new(&config.source, config.resources.batch_size);
    match bounded(timeout, extractor.check(), || {
        PipelineError::SourceUnavailable("connection test: timed out".to_string())
    })
    .await
    {
        Ok(()) => {
            tracing::info!(host = config.source.host.as_str(), "Source: OK");
            result.source_ok = true;
        }
        Err(e) => tracing::error!(error = %e, "Source: FAILED"),
    }

    let index_probe = match ElasticsearchLoader::new(&config.index, timeout) {
        Ok(loader) => loader.check().await,
        Err(e) => Err(e),
    };
    match index_probe {
        Ok(()) => {
            tracing::info!(url = config.index.url.as_str(), "Index: OK");
            result.index_ok = true;
        }
        Err(e) => tracing::error!(error = %e, "Index: FAILED"),
    }

    result
}
