//! JSON-file implementation of [`CheckpointStore`].
//!
//! The whole checkpoint map is one JSON object on disk. Every write
//! rewrites the file through a sibling temp file and a rename, so a crash
//! mid-write leaves the previous contents in place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use searchsync_types::entity::CheckpointKey;

use crate::backend::CheckpointStore;
use crate::error::{self, StateError};

/// Checkpoints kept in a single JSON document.
pub struct JsonFileCheckpointStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileCheckpointStore {
    /// Use `path` as the checkpoint file, creating it (and its parent
    /// directory) when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the file or directory can't be created.
    pub fn open(path: impl Into<PathBuf>) -> error::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if !path.exists() {
            std::fs::write(&path, b"{}")?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> error::Result<MutexGuard<'_, ()>> {
        self.lock.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Empty or unparseable files read as an empty map.
    fn read_map(&self) -> error::Result<BTreeMap<String, String>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        match serde_json::from_str(&raw) {
            Ok(map) => Ok(map),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Checkpoint file is not a JSON object of strings, treating as empty"
                );
                Ok(BTreeMap::new())
            }
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> error::Result<()> {
        let encoded = serde_json::to_vec_pretty(map)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, encoded)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CheckpointStore for JsonFileCheckpointStore {
    fn get(&self, key: &CheckpointKey) -> error::Result<Option<String>> {
        let _guard = self.lock()?;
        Ok(self.read_map()?.remove(key.as_str()))
    }

    fn set(&self, key: &CheckpointKey, value: &str) -> error::Result<()> {
        let _guard = self.lock()?;
        let mut map = self.read_map()?;
        map.insert(key.as_str().to_string(), value.to_string());
        self.write_map(&map)
    }

    fn backend_name(&self) -> &'static str {
        "json_file"
    }
}
