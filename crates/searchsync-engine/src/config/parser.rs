//! Pipeline YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Captures, Regex};

use crate::config::types::PipelineConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// Query placeholders such as `$1` don't match and pass through untouched.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();

    let result = ENV_VAR_RE.replace_all(input, |cap: &Captures<'_>| {
        let var_name = &cap[1];
        std::env::var(var_name).unwrap_or_else(|_| {
            if !missing.iter().any(|m| m == var_name) {
                missing.push(var_name.to_string());
            }
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}

/// Parse a pipeline YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_pipeline_str(yaml_str: &str) -> Result<PipelineConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    serde_yaml::from_str(&substituted).context("Failed to parse pipeline YAML")
}

/// Parse a pipeline YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_pipeline(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
    parse_pipeline_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("SS_TEST_HOST", "db.example.com");
        let input = "host: ${SS_TEST_HOST}\nport: 5432";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "host: db.example.com\nport: 5432");
        std::env::remove_var("SS_TEST_HOST");
    }

    #[test]
    fn test_query_placeholders_pass_through() {
        let input = "query: SELECT 1 WHERE id > $1::text::uuid LIMIT $2";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_missing_env_vars_all_reported_once() {
        let input = "${SS_MISSING_X} ${SS_MISSING_Y} ${SS_MISSING_X}";
        let err_msg = substitute_env_vars(input).unwrap_err().to_string();
        assert!(err_msg.contains("SS_MISSING_X"));
        assert!(err_msg.contains("SS_MISSING_Y"));
        assert_eq!(err_msg.matches("SS_MISSING_X").count(), 1);
    }

    #[test]
    fn test_parse_pipeline_from_string() {
        std::env::set_var("SS_TEST_PG_PASS", "secret");
        let yaml = r#"
version: "1.0"
pipeline: test
source:
  host: localhost
  user: app
  password: ${SS_TEST_PG_PASS}
  database: movies
index:
  url: http://localhost:9200
entities:
  - name: genres
    kind: genre
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        assert_eq!(config.source.password, "secret");
        assert_eq!(config.entities[0].name.as_str(), "genres");
        std::env::remove_var("SS_TEST_PG_PASS");
    }

    #[test]
    fn test_parse_invalid_yaml_errors() {
        let yaml = "this is not: [valid: yaml: {{{}}}";
        assert!(parse_pipeline_str(yaml).is_err());
    }

    #[test]
    fn test_parse_pipeline_file_not_found() {
        let err_msg = parse_pipeline(Path::new("/nonexistent/pipeline.yaml"))
            .unwrap_err()
            .to_string();
        assert!(err_msg.contains("Failed to read pipeline file"));
    }
}
