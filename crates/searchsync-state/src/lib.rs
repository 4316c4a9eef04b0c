//! Watermark checkpoint persistence for searchsync.
//!
//! Provides the [`CheckpointStore`] trait, its `SQLite`, `PostgreSQL`,
//! JSON-file and Redis implementations, and the monotonic watermark helpers
//! the engine commits through.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod json_file;
pub mod postgres;
mod reconnect;
pub mod redis;
pub mod sqlite;
pub mod watermark;

pub use crate::backend::CheckpointStore;
pub use crate::error::StateError;
pub use crate::json_file::JsonFileCheckpointStore;
pub use crate::postgres::PostgresCheckpointStore;
pub use crate::redis::RedisCheckpointStore;
pub use crate::sqlite::SqliteCheckpointStore;
pub use crate::watermark::{commit_watermark, load_watermark, CommitOutcome};

