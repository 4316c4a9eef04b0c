//! Pipeline configuration: YAML types, parsing and validation.

pub mod parser;
pub mod queries;
pub mod types;
pub mod validator;

pub use parser::{parse_pipeline, parse_pipeline_str};
pub use types::PipelineConfig;
pub use validator::validate_pipeline;
