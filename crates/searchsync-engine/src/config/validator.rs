//! Semantic validation for parsed pipeline configuration values.

use std::collections::HashSet;

use anyhow::{bail, Result};
use searchsync_types::entity::CursorKind;

use crate::config::types::{BackoffConfig, EntityConfig, PipelineConfig};

fn validate_entity(entity: &EntityConfig, errors: &mut Vec<String>) {
    let name = entity.name.as_str();
    if name.trim().is_empty() {
        errors.push("Entity has an empty name".to_string());
        return;
    }
    if name.starts_with(['_', '-', '+']) || name.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push(format!(
            "Entity '{name}' is not a valid index name (lowercase, must not start with _, - or +)"
        ));
    }
    if entity.cursor_field.trim().is_empty() {
        errors.push(format!("Entity '{name}' has an empty cursor_field"));
    }
    match &entity.query {
        Some(query) => {
            for placeholder in ["$1", "$2"] {
                if !query.contains(placeholder) {
                    errors.push(format!(
                        "Entity '{name}' query must reference {placeholder} (watermark, batch size)"
                    ));
                }
            }
        }
        None if entity.cursor != CursorKind::Timestamp => {
            errors.push(format!(
                "Entity '{name}' uses a {} cursor but has no query; built-in queries page by timestamp",
                entity.cursor
            ));
        }
        None => {}
    }
}

fn validate_backoff(backoff: &BackoffConfig, errors: &mut Vec<String>) {
    if !backoff.start_secs.is_finite() || backoff.start_secs <= 0.0 {
        errors.push("backoff.start_secs must be > 0".to_string());
    }
    if !backoff.factor.is_finite() || backoff.factor < 0.0 {
        errors.push("backoff.factor must be >= 0".to_string());
    }
    if !backoff.border_secs.is_finite() || backoff.border_secs < backoff.start_secs {
        errors.push("backoff.border_secs must be >= backoff.start_secs".to_string());
    }
}

/// Validate a parsed pipeline configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the pipeline config.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported pipeline version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    if config.source.host.trim().is_empty() {
        errors.push("source.host must not be empty".to_string());
    }
    if config.source.database.trim().is_empty() {
        errors.push("source.database must not be empty".to_string());
    }

    if !(config.index.url.starts_with("http://") || config.index.url.starts_with("https://")) {
        errors.push(format!(
            "index.url '{}' must be an http(s) URL",
            config.index.url
        ));
    }
    if config.index.password.is_some() && config.index.username.is_none() {
        errors.push("index.password is set without index.username".to_string());
    }

    if config.entities.is_empty() {
        errors.push("Pipeline must define at least one entity".to_string());
    }

    let mut seen = HashSet::new();
    for entity in &config.entities {
        if !seen.insert(entity.name.as_str()) {
            errors.push(format!("Duplicate entity name '{}'", entity.name));
        }
        validate_entity(entity, &mut errors);
    }

    if config.state.backend.requires_connection()
        && config
            .state
            .connection
            .as_deref()
            .map_or(true, |c| c.trim().is_empty())
    {
        errors.push(format!(
            "state.connection is required for the {:?} backend",
            config.state.backend
        ));
    }

    if config.resources.batch_size == 0 {
        errors.push("resources.batch_size must be at least 1".to_string());
    }
    if config.resources.io_timeout_seconds == 0 {
        errors.push("resources.io_timeout_seconds must be at least 1".to_string());
    }

    validate_backoff(&config.backoff, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }
}
