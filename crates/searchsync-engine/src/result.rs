//! Load, cycle and run result types.

use searchsync_state::CommitOutcome;
use searchsync_types::entity::EntityName;
use searchsync_types::watermark::Watermark;

use crate::errors::RowError;

/// One document the index (or the transformer) rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub id: String,
    /// HTTP status of the bulk item; `0` when the document never reached the index.
    pub status: u16,
    pub reason: String,
}

impl From<RowError> for ItemFailure {
    fn from(err: RowError) -> Self {
        Self {
            id: err.document_id().unwrap_or_default().to_string(),
            status: 0,
            reason: err.to_string(),
        }
    }
}

/// Per-document result of a bulk write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<ItemFailure>,
}

impl LoadOutcome {
    /// Every document was accepted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    pub fn record_failure(&mut self, failure: ItemFailure) {
        self.failed += 1;
        self.failures.push(failure);
    }
}

/// What one entity cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Nothing past the watermark.
    NoNewData,
    /// A batch went through load and commit.
    Loaded {
        documents: usize,
        failed: usize,
        watermark: Watermark,
        commit: CommitOutcome,
        /// The last row's cursor was unreadable; the previous watermark was kept.
        malformed: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityReport {
    pub entity: EntityName,
    pub outcome: CycleOutcome,
}

/// Result of one pass over every configured entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub entities: Vec<EntityReport>,
    pub duration_secs: f64,
}

impl RunSummary {
    #[must_use]
    pub fn documents_loaded(&self) -> usize {
        self.entities
            .iter()
            .map(|r| match r.outcome {
                CycleOutcome::Loaded { documents, .. } => documents,
                CycleOutcome::NoNewData => 0,
            })
            .sum()
    }

    #[must_use]
    pub fn documents_failed(&self) -> usize {
        self.entities
            .iter()
            .map(|r| match r.outcome {
                CycleOutcome::Loaded { failed, .. } => failed,
                CycleOutcome::NoNewData => 0,
            })
            .sum()
    }

    /// No entity had new data.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.entities
            .iter()
            .all(|r| r.outcome == CycleOutcome::NoNewData)
    }

    /// Some entity loaded documents and moved its watermark forward.
    #[must_use]
    pub fn made_progress(&self) -> bool {
        self.entities.iter().any(|r| {
            matches!(
                r.outcome,
                CycleOutcome::Loaded { documents, commit: CommitOutcome::Advanced, .. } if documents > 0
            )
        })
    }

    /// Outcome recorded for `entity`, if it ran.
    #[must_use]
    pub fn outcome(&self, entity: &str) -> Option<&CycleOutcome> {
        self.entities
            .iter()
            .find(|r| r.entity.as_str() == entity)
            .map(|r| &r.outcome)
    }
}
