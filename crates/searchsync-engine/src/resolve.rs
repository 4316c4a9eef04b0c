//! Checkpoint store construction from configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use searchsync_state::{
    CheckpointStore, JsonFileCheckpointStore, PostgresCheckpointStore, RedisCheckpointStore,
    SqliteCheckpointStore,
};

use crate::config::types::{StateBackendKind, StateConfig};

fn default_state_path(file_name: &str) -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".searchsync").join(file_name)
}

/// Open the configured checkpoint store.
///
/// Blocking: the `postgres` backend drives its own runtime, so call this
/// from `spawn_blocking` when inside an async context.
///
/// # Errors
///
/// Returns an error if the store can't be opened or reached.
pub fn open_checkpoint_store(config: &StateConfig) -> Result<Arc<dyn CheckpointStore>> {
    match config.backend {
        StateBackendKind::Sqlite => {
            let store = if let Some(path) = &config.connection {
                SqliteCheckpointStore::open(Path::new(path)).context("Failed to open state DB")?
            } else {
                SqliteCheckpointStore::open(&default_state_path("state.db"))
                    .context("Failed to open default state DB")?
            };
            Ok(Arc::new(store) as Arc<dyn CheckpointStore>)
        }
        StateBackendKind::JsonFile => {
            let path = config
                .connection
                .as_ref()
                .map_or_else(|| default_state_path("state.json"), PathBuf::from);
            let store = JsonFileCheckpointStore::open(&path)
                .with_context(|| format!("Failed to open state file {}", path.display()))?;
            Ok(Arc::new(store) as Arc<dyn CheckpointStore>)
        }
        StateBackendKind::Postgres => {
            let connstr = config
                .connection
                .as_deref()
                .context("state.connection is required for the postgres backend")?;
            let store = PostgresCheckpointStore::open(connstr)
                .context("Failed to open Postgres state backend")?;
            Ok(Arc::new(store) as Arc<dyn CheckpointStore>)
        }
        StateBackendKind::Redis => {
            let url = config
                .connection
                .as_deref()
                .context("state.connection is required for the redis backend")?;
            let store = RedisCheckpointStore::open(url, config.key_prefix.clone())
                .context("Failed to open Redis state backend")?;
            Ok(Arc::new(store) as Arc<dyn CheckpointStore>)
        }
    }
}
