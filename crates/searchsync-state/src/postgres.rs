//! `PostgreSQL`-backed implementation of [`CheckpointStore`].
//!
//! Uses the sync `postgres` crate behind a mutex, reconnecting when the
//! server drops the connection. The `postgres` crate manages its own
//! internal tokio runtime, so callers inside an async context must go
//! through `spawn_blocking`.

use chrono::Utc;
use postgres::{Client, NoTls};
use searchsync_types::entity::CheckpointKey;

use crate::backend::CheckpointStore;
use crate::error::{self, StateError};
use crate::reconnect::{Link, Reconnecting};

/// Idempotent DDL for the checkpoint table (`PostgreSQL` dialect).
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS sync_checkpoints (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (now()::text)
);
";

impl Link for Client {
    fn connect(target: &str) -> error::Result<Self> {
        let mut client = Client::connect(target, NoTls)?;
        client.batch_execute(CREATE_TABLES)?;
        Ok(client)
    }

    fn is_alive(&self) -> bool {
        !self.is_closed()
    }

    fn is_fatal(&self, err: &StateError) -> bool {
        matches!(err, StateError::Postgres(e) if e.is_closed())
    }
}

/// `PostgreSQL`-backed checkpoint storage.
///
/// Create with [`PostgresCheckpointStore::open`] providing a libpq-style
/// connection string (e.g. `"host=localhost dbname=searchsync user=postgres"`).
pub struct PostgresCheckpointStore {
    client: Reconnecting<Client>,
}

impl PostgresCheckpointStore {
    /// Connect to a `PostgreSQL` database and initialize the checkpoint table.
    ///
    /// `connstr` is a libpq-style connection string or `PostgreSQL` URI:
    /// - `"host=localhost port=5432 dbname=searchsync user=postgres"`
    /// - `"postgresql://postgres@localhost/searchsync"`
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Postgres`] if connection or DDL execution fails.
    pub fn open(connstr: &str) -> error::Result<Self> {
        Ok(Self {
            client: Reconnecting::open(connstr)?,
        })
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    fn get(&self, key: &CheckpointKey) -> error::Result<Option<String>> {
        self.client.with(|client| {
            let row = client.query_opt(
                "SELECT value FROM sync_checkpoints WHERE key = $1",
                &[&key.as_str()],
            )?;
            Ok::<_, postgres::Error>(row.map(|r| r.get::<_, String>(0)))
        })
    }

    fn set(&self, key: &CheckpointKey, value: &str) -> error::Result<()> {
        self.client.with(|client| {
            client.execute(
                "INSERT INTO sync_checkpoints (key, value, updated_at) VALUES ($1, $2, $3) \
                 ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = $3",
                &[&key.as_str(), &value, &Utc::now().to_rfc3339()],
            )?;
            Ok::<_, postgres::Error>(())
        })
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
