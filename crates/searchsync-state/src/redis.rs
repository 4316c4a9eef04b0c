//! Redis-backed implementation of [`CheckpointStore`].
//!
//! Checkpoints live as plain string keys, optionally namespaced with a
//! prefix so several pipelines can share one Redis database.

use redis::{Commands, ConnectionLike};
use searchsync_types::entity::CheckpointKey;

use crate::backend::CheckpointStore;
use crate::error::{self, StateError};
use crate::reconnect::{Link, Reconnecting};

impl Link for redis::Connection {
    fn connect(target: &str) -> error::Result<Self> {
        Ok(redis::Client::open(target)?.get_connection()?)
    }

    fn is_alive(&self) -> bool {
        self.is_open()
    }

    fn is_fatal(&self, err: &StateError) -> bool {
        matches!(err, StateError::Redis(e) if e.is_connection_dropped() || e.is_io_error())
    }
}

/// Redis-backed checkpoint storage over one synchronous connection,
/// re-established after the server drops it.
pub struct RedisCheckpointStore {
    conn: Reconnecting<redis::Connection>,
    prefix: String,
}

impl RedisCheckpointStore {
    /// Connect to Redis at `url` (e.g. `"redis://127.0.0.1:6379/0"`).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Redis`] if the URL is invalid or the server is
    /// unreachable.
    pub fn open(url: &str, prefix: impl Into<String>) -> error::Result<Self> {
        Ok(Self {
            conn: Reconnecting::open(url)?,
            prefix: prefix.into(),
        })
    }

    fn full_key(&self, key: &CheckpointKey) -> String {
        format!("{}{}", self.prefix, key.as_str())
    }
}

impl CheckpointStore for RedisCheckpointStore {
    fn get(&self, key: &CheckpointKey) -> error::Result<Option<String>> {
        let full_key = self.full_key(key);
        self.conn.with(|conn| conn.get::<_, Option<String>>(full_key))
    }

    fn set(&self, key: &CheckpointKey, value: &str) -> error::Result<()> {
        let full_key = self.full_key(key);
        self.conn.with(|conn| conn.set::<_, _, ()>(full_key, value))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }

    fn ping(&self) -> error::Result<()> {
        self.conn
            .with(|conn| redis::cmd("PING").query::<String>(conn))
            .map(|_| ())
    }
}
