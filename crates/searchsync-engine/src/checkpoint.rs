//! Async access to the synchronous checkpoint store.
//!
//! Store calls run on the blocking pool and are bounded by the I/O timeout.

use std::sync::Arc;
use std::time::Duration;

use searchsync_state::{commit_watermark, load_watermark, CheckpointStore, CommitOutcome};
use searchsync_types::watermark::Watermark;

use crate::config::types::EntityConfig;
use crate::errors::PipelineError;
use crate::orchestrator::StoreOpener;

async fn run_blocking<T, F>(op: &str, timeout: Duration, f: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, searchsync_state::StateError> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result.map_err(PipelineError::from),
        Ok(Err(join_err)) => Err(PipelineError::CheckpointUnavailable(format!(
            "{op}: task failed: {join_err}"
        ))),
        Err(_) => Err(PipelineError::CheckpointUnavailable(format!(
            "{op}: timed out after {}s",
            timeout.as_secs_f64()
        ))),
    }
}

/// Open the store through `opener`, bounded like any other store call.
pub(crate) async fn open_store(
    opener: StoreOpener,
    timeout: Duration,
) -> Result<Arc<dyn CheckpointStore>, PipelineError> {
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || opener())).await {
        Ok(Ok(Ok(store))) => Ok(store),
        Ok(Ok(Err(e))) => Err(PipelineError::CheckpointUnavailable(format!(
            "open checkpoint store: {e:#}"
        ))),
        Ok(Err(join_err)) => Err(PipelineError::CheckpointUnavailable(format!(
            "open checkpoint store: task failed: {join_err}"
        ))),
        Err(_) => Err(PipelineError::CheckpointUnavailable(format!(
            "open checkpoint store: timed out after {}s",
            timeout.as_secs_f64()
        ))),
    }
}

/// Stored watermark for `entity`, or the minimum for its cursor kind.
pub(crate) async fn read_watermark(
    store: &Arc<dyn CheckpointStore>,
    entity: &EntityConfig,
    timeout: Duration,
) -> Result<Watermark, PipelineError> {
    let store = Arc::clone(store);
    let name = entity.name.clone();
    let kind = entity.cursor;
    run_blocking("read watermark", timeout, move || {
        load_watermark(store.as_ref(), &name, kind)
    })
    .await
}

/// Persist `watermark` for `entity` if it moves forward.
pub(crate) async fn write_watermark(
    store: &Arc<dyn CheckpointStore>,
    entity: &EntityConfig,
    watermark: &Watermark,
    timeout: Duration,
) -> Result<CommitOutcome, PipelineError> {
    let store = Arc::clone(store);
    let name = entity.name.clone();
    let watermark = watermark.clone();
    let outcome = run_blocking("commit watermark", timeout, move || {
        commit_watermark(store.as_ref(), &name, &watermark)
    })
    .await?;
    Ok(outcome)
}

/// Cheap round trip to the store.
pub(crate) async fn ping(store: &Arc<dyn CheckpointStore>, timeout: Duration) -> Result<(), PipelineError> {
    let store = Arc::clone(store);
    run_blocking("ping checkpoint store", timeout, move || store.ping()).await
}
