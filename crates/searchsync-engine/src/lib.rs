//! Incremental `PostgreSQL` to Elasticsearch sync engine.
//!
//! A pipeline reads each configured entity's rows past its stored watermark,
//! groups them into search documents, bulk-upserts them and only then
//! advances the watermark.

#![warn(clippy::pedantic)]

pub(crate) mod checkpoint;
pub mod config;
pub mod errors;
pub mod extract;
pub mod load;
pub mod orchestrator;
pub mod resolve;
pub mod result;
pub mod schema;
pub mod transform;

pub use crate::config::{parse_pipeline, parse_pipeline_str, validate_pipeline, PipelineConfig};
pub use crate::errors::{compute_backoff, BackoffPolicy, PipelineError, RowError};
pub use crate::extract::{Extractor, PostgresExtractor};
pub use crate::load::{ElasticsearchLoader, Loader};
pub use crate::orchestrator::{
    build_pipeline, check_pipeline, CheckResult, Pipeline, PipelineState, RunOptions, RunStats,
    SearchSyncPipeline, StoreOpener,
};
pub use crate::result::{CycleOutcome, EntityReport, ItemFailure, LoadOutcome, RunSummary};
pub use crate::transform::{transform, TransformedBatch};
