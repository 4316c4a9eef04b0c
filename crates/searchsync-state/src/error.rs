//! Checkpoint store error types.

use searchsync_types::watermark::WatermarkError;

/// Errors produced by [`CheckpointStore`](crate::CheckpointStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Underlying `PostgreSQL` failure.
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),

    /// Underlying Redis failure.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// File-system I/O failure (e.g. creating the state directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Checkpoint file could not be encoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored value is not a valid cursor for the entity.
    #[error("corrupt checkpoint '{key}': {source}")]
    CorruptValue {
        key: String,
        #[source]
        source: WatermarkError,
    },

    /// Internal mutex was poisoned by a panicked thread.
    #[error("checkpoint store lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
