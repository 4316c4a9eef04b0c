//! Pipeline error model and retry backoff policy.

use std::time::Duration;

use searchsync_state::StateError;

// ---------------------------------------------------------------------------
// PipelineError: categorised errors for retry decisions
// ---------------------------------------------------------------------------

/// Categorized pipeline error.
///
/// Everything except `Config` is transient: the orchestrator backs off and
/// retries the whole run. `NoNewData` is a control signal, not a failure.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The source returned no rows past the watermark.
    #[error("no new data for '{entity}'")]
    NoNewData { entity: String },

    /// Connecting to or querying the source failed (or timed out).
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The search index rejected the request or couldn't be reached.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// Reading or writing the checkpoint store failed.
    #[error("checkpoint store unavailable: {0}")]
    CheckpointUnavailable(String),

    /// Some documents of a batch were rejected by the index.
    #[error("{failed} of {attempted} documents rejected by index '{index}': {first_reason}")]
    PartialLoad {
        index: String,
        attempted: usize,
        failed: usize,
        first_reason: String,
    },

    /// Invalid configuration or query shape. Never retried.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<StateError> for PipelineError {
    fn from(e: StateError) -> Self {
        Self::CheckpointUnavailable(e.to_string())
    }
}

impl PipelineError {
    /// Whether the orchestrator should back off and retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Config(_))
    }

    /// Stable label for structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoNewData { .. } => "no_new_data",
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::IndexUnavailable(_) => "index_unavailable",
            Self::CheckpointUnavailable(_) => "checkpoint_unavailable",
            Self::PartialLoad { .. } => "partial_load",
            Self::Config(_) => "config",
        }
    }

    pub(crate) fn source_unavailable(context: &str, err: impl std::fmt::Display) -> Self {
        Self::SourceUnavailable(format!("{context}: {err}"))
    }

    pub(crate) fn index_unavailable(context: &str, err: impl std::fmt::Display) -> Self {
        Self::IndexUnavailable(format!("{context}: {err}"))
    }
}

/// A raw row group that could not become a document.
///
/// Reported per document; never aborts the batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    #[error("row has no '{column}' value")]
    MissingField { column: &'static str },

    #[error("document {id}: column '{column}' is invalid: {reason}")]
    InvalidValue {
        id: String,
        column: String,
        reason: String,
    },
}

impl RowError {
    /// Id of the offending document, when the row got far enough to have one.
    #[must_use]
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Self::InvalidValue { id, .. } => Some(id),
            Self::MissingField { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential retry delay: `min(border, start * 2^(factor * attempt))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub start_secs: f64,
    pub factor: f64,
    pub border_secs: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            start_secs: 0.1,
            factor: 2.0,
            border_secs: 10.0,
        }
    }
}

/// Compute the delay before retry `attempt` (0-based).
#[must_use]
pub fn compute_backoff(policy: &BackoffPolicy, attempt: u32) -> Duration {
    let exponent = policy.factor * f64::from(attempt);
    let secs = policy.start_secs * 2f64.powf(exponent);
    let clamped = if secs.is_finite() {
        secs.min(policy.border_secs)
    } else {
        policy.border_secs
    };
    Duration::from_secs_f64(clamped.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    // -----------------------------------------------------------------------
    // PipelineError tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_only_config_is_fatal() {
        assert!(PipelineError::NoNewData { entity: "movies".into() }.is_transient());
        assert!(PipelineError::SourceUnavailable("x".into()).is_transient());
        assert!(PipelineError::IndexUnavailable("x".into()).is_transient());
        assert!(PipelineError::CheckpointUnavailable("x".into()).is_transient());
        assert!(PipelineError::PartialLoad {
            index: "movies".into(),
            attempted: 3,
            failed: 1,
            first_reason: "mapper_parsing_exception".into(),
        }
        .is_transient());
        assert!(!PipelineError::Config("bad".into()).is_transient());
    }

    #[test]
    fn test_state_error_maps_to_checkpoint_unavailable() {
        let err: PipelineError = StateError::LockPoisoned.into();
        assert_eq!(err.kind(), "checkpoint_unavailable");
        assert!(err.to_string().contains("lock poisoned"));
    }

    #[test]
    fn test_partial_load_display() {
        let err = PipelineError::PartialLoad {
            index: "movies".into(),
            attempted: 10,
            failed: 2,
            first_reason: "strict mapping".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("2 of 10"));
        assert!(msg.contains("movies"));
        assert!(msg.contains("strict mapping"));
    }

    #[test]
    fn test_row_error_document_id() {
        let invalid = RowError::InvalidValue {
            id: "f1".into(),
            column: "persons".into(),
            reason: "not an array".into(),
        };
        assert_eq!(invalid.document_id(), Some("f1"));
        assert_eq!(RowError::MissingField { column: "id" }.document_id(), None);
    }

    #[test]
    fn test_helper_constructors_prefix_context() {
        let err = PipelineError::source_unavailable("query movies", "connection reset");
        assert_eq!(err.to_string(), "source unavailable: query movies: connection reset");
        assert_eq!(PipelineError::index_unavailable("bulk", "503").kind(), "index_unavailable");
    }

    // -----------------------------------------------------------------------
    // compute_backoff tests
    // -----------------------------------------------------------------------

    #[rstest]
    #[case(0, 100)]
    #[case(1, 400)]
    #[case(2, 1_600)]
    #[case(3, 6_400)]
    #[case(4, 10_000)]
    #[case(5, 10_000)]
    #[case(60, 10_000)]
    fn test_default_backoff_sequence(#[case] attempt: u32, #[case] expected_ms: u128) {
        let delay = compute_backoff(&BackoffPolicy::default(), attempt);
        assert_eq!(delay.as_millis(), expected_ms);
    }

    #[test]
    fn test_factor_zero_is_constant() {
        let policy = BackoffPolicy {
            start_secs: 0.5,
            factor: 0.0,
            border_secs: 10.0,
        };
        assert_eq!(compute_backoff(&policy, 0), compute_backoff(&policy, 7));
        assert_eq!(compute_backoff(&policy, 7).as_millis(), 500);
    }

    #[test]
    fn test_huge_attempt_clamps_to_border() {
        let delay = compute_backoff(&BackoffPolicy::default(), u32::MAX);
        assert_eq!(delay, Duration::from_secs(10));
    }
}
