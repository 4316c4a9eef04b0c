//! Checkpoint store trait definition.
//!
//! [`CheckpointStore`] is a flat string key/value contract. Keys follow the
//! `"<entity>_last_id"` / `"<entity>_last_modified"` layout built by
//! [`CheckpointKey`]; values are string-encoded cursors.

use searchsync_types::entity::CheckpointKey;

use crate::error;

/// Storage contract for sync watermarks.
///
/// Implementations must be `Send + Sync` for use behind
/// `Arc<dyn CheckpointStore>`. The pipeline is the only writer, so stores
/// only need to make single operations safe, not read-modify-write cycles.
pub trait CheckpointStore: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// Returns `Ok(None)` when the key was never written.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get(&self, key: &CheckpointKey) -> error::Result<Option<String>>;

    /// Upsert the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn set(&self, key: &CheckpointKey, value: &str) -> error::Result<()>;

    /// Short backend label for logs (e.g. `"sqlite"`).
    fn backend_name(&self) -> &'static str;

    /// Cheap connectivity probe used by `check`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) when the store is unreachable.
    fn ping(&self) -> error::Result<()> {
        self.get(&CheckpointKey::new("__searchsync_ping")).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify the trait is object-safe (can be used as `dyn CheckpointStore`).
    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn CheckpointStore) {}
    }
}
