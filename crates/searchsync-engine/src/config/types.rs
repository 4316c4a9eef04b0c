//! Pipeline configuration types deserialized from YAML.

use serde::{Deserialize, Serialize};

use searchsync_types::entity::{CheckpointKey, CursorKind, EntityKind, EntityName};

use crate::config::queries::default_query;
use crate::errors::BackoffPolicy;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub version: String,
    pub pipeline: String,
    pub source: SourceConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub state: StateConfig,
    pub entities: Vec<EntityConfig>,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

/// `PostgreSQL` source connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
}

fn default_pg_port() -> u16 {
    5432
}

/// Elasticsearch endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Checkpoint store selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    /// Path (`sqlite`, `json_file`), connection string (`postgres`) or
    /// URL (`redis`).
    pub connection: Option<String>,
    /// Key prefix for the `redis` backend.
    #[serde(default)]
    pub key_prefix: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackendKind::default(),
            connection: None,
            key_prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackendKind {
    #[default]
    Sqlite,
    Postgres,
    JsonFile,
    Redis,
}

impl StateBackendKind {
    /// Whether the backend can't run without `state.connection`.
    #[must_use]
    pub fn requires_connection(self) -> bool {
        matches!(self, Self::Postgres | Self::Redis)
    }
}

/// One synced entity type: its source query, cursor and target index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Entity name; also the target index name.
    pub name: EntityName,
    pub kind: EntityKind,
    #[serde(default)]
    pub cursor: CursorKind,
    #[serde(default = "default_cursor_field")]
    pub cursor_field: String,
    /// Custom extract query. `$1` is bound to the watermark as text and
    /// `$2` to the batch size as `bigint`.
    #[serde(default)]
    pub query: Option<String>,
}

fn default_cursor_field() -> String {
    "modified".to_string()
}

impl EntityConfig {
    /// Query text: the configured one or the built-in default for `kind`.
    #[must_use]
    pub fn query_text(&self) -> &str {
        self.query.as_deref().unwrap_or_else(|| default_query(self.kind))
    }

    /// Index the documents of this entity are written to.
    #[must_use]
    pub fn index_name(&self) -> &str {
        self.name.as_str()
    }

    #[must_use]
    pub fn checkpoint_key(&self) -> CheckpointKey {
        CheckpointKey::for_entity(&self.name, self.cursor)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnLoadError {
    /// Any failed document fails the cycle; the watermark stays put.
    #[default]
    Fail,
    /// Failed documents are logged and the watermark still advances.
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_io_timeout_seconds")]
    pub io_timeout_seconds: u64,
    #[serde(default)]
    pub on_load_error: OnLoadError,
}

fn default_batch_size() -> u32 {
    100
}
fn default_io_timeout_seconds() -> u64 {
    30
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            io_timeout_seconds: default_io_timeout_seconds(),
            on_load_error: OnLoadError::default(),
        }
    }
}

impl ResourceConfig {
    #[must_use]
    pub fn io_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.io_timeout_seconds)
    }
}

/// Retry delay parameters, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_start_secs")]
    pub start_secs: f64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_border_secs")]
    pub border_secs: f64,
}

fn default_start_secs() -> f64 {
    0.1
}
fn default_factor() -> f64 {
    2.0
}
fn default_border_secs() -> f64 {
    10.0
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            start_secs: default_start_secs(),
            factor: default_factor(),
            border_secs: default_border_secs(),
        }
    }
}

impl BackoffConfig {
    #[must_use]
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            start_secs: self.start_secs,
            factor: self.factor,
            border_secs: self.border_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_pipeline() {
        let yaml = r#"
version: "1.0"
pipeline: movies_to_es
source:
  host: localhost
  user: app
  database: movies
index:
  url: http://localhost:9200
entities:
  - name: movies
    kind: movie
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.pipeline, "movies_to_es");
        assert_eq!(config.source.port, 5432);
        assert!(config.source.password.is_empty());
        assert!(config.index.username.is_none());
        // Defaults applied
        assert_eq!(config.state.backend, StateBackendKind::Sqlite);
        assert_eq!(config.resources.batch_size, 100);
        assert_eq!(config.resources.io_timeout_seconds, 30);
        assert_eq!(config.resources.on_load_error, OnLoadError::Fail);
        assert!((config.backoff.start_secs - 0.1).abs() < f64::EPSILON);
        let movies = &config.entities[0];
        assert_eq!(movies.cursor, CursorKind::Timestamp);
        assert_eq!(movies.cursor_field, "modified");
        assert_eq!(movies.checkpoint_key().as_str(), "movies_last_modified");
        assert!(movies.query_text().contains("content.film_work"));
    }

    #[test]
    fn test_deserialize_full_pipeline() {
        let yaml = r#"
version: "1.0"
pipeline: full
source:
  host: db
  port: 6543
  user: app
  password: secret
  database: movies
index:
  url: https://es:9200
  username: elastic
  password: changeme
state:
  backend: redis
  connection: redis://127.0.0.1/0
  key_prefix: "searchsync:"
entities:
  - name: movies
    kind: movie
    cursor: uuid
    cursor_field: id
    query: "SELECT * FROM film_work WHERE id > $1::text::uuid ORDER BY id LIMIT $2"
resources:
  batch_size: 500
  io_timeout_seconds: 5
  on_load_error: skip
backoff:
  start_secs: 1
  factor: 1
  border_secs: 30
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.source.port, 6543);
        assert_eq!(config.index.username.as_deref(), Some("elastic"));
        assert_eq!(config.state.backend, StateBackendKind::Redis);
        assert_eq!(config.state.key_prefix, "searchsync:");
        let movies = &config.entities[0];
        assert_eq!(movies.cursor, CursorKind::Uuid);
        assert_eq!(movies.checkpoint_key().as_str(), "movies_last_id");
        assert!(movies.query_text().starts_with("SELECT * FROM film_work"));
        assert_eq!(config.resources.on_load_error, OnLoadError::Skip);
        assert_eq!(config.resources.io_timeout().as_secs(), 5);
        assert!((config.backoff.border_secs - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_entity_kind_rejected() {
        let yaml = r#"
version: "1.0"
pipeline: p
source: {host: h, user: u, database: d}
index: {url: "http://es"}
entities:
  - name: series
    kind: tv_show
"#;
        let err = serde_yaml::from_str::<PipelineConfig>(yaml).unwrap_err();
        assert!(err.to_string().contains("tv_show"), "got: {err}");
    }

    #[test]
    fn test_requires_connection() {
        assert!(!StateBackendKind::Sqlite.requires_connection());
        assert!(!StateBackendKind::JsonFile.requires_connection());
        assert!(StateBackendKind::Postgres.requires_connection());
        assert!(StateBackendKind::Redis.requires_connection());
    }
}
