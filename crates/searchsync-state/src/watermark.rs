//! Typed watermark reads and monotonic commits on top of a [`CheckpointStore`].

use std::cmp::Ordering;

use searchsync_types::entity::{CheckpointKey, CursorKind, EntityName};
use searchsync_types::watermark::Watermark;

use crate::backend::CheckpointStore;
use crate::error::{self, StateError};

/// Result of [`commit_watermark`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The stored watermark moved forward (or was written for the first time).
    Advanced,
    /// The candidate equals the stored watermark; nothing was written.
    Unchanged,
    /// The candidate is lower than the stored watermark and was refused.
    Regressed {
        /// Watermark that stays in the store.
        stored: Watermark,
    },
}

/// Load the watermark for `entity`, or the minimum for `kind` if none is stored.
///
/// # Errors
///
/// Returns [`StateError::CorruptValue`] when the stored string is not a valid
/// `kind` cursor, or the store's own error on read failure.
pub fn load_watermark(
    store: &dyn CheckpointStore,
    entity: &EntityName,
    kind: CursorKind,
) -> error::Result<Watermark> {
    let key = CheckpointKey::for_entity(entity, kind);
    match store.get(&key)? {
        Some(raw) => parse_stored(&key, kind, &raw),
        None => Ok(Watermark::minimum(kind)),
    }
}

/// Persist `candidate` for `entity` unless it would move the watermark backwards.
///
/// # Errors
///
/// Returns [`StateError::CorruptValue`] when the currently stored value is
/// unreadable, or the store's own error on read/write failure.
pub fn commit_watermark(
    store: &dyn CheckpointStore,
    entity: &EntityName,
    candidate: &Watermark,
) -> error::Result<CommitOutcome> {
    let kind = candidate.kind();
    let key = CheckpointKey::for_entity(entity, kind);

    if let Some(raw) = store.get(&key)? {
        let stored = parse_stored(&key, kind, &raw)?;
        match candidate.compare(&stored) {
            Some(Ordering::Equal) => return Ok(CommitOutcome::Unchanged),
            Some(Ordering::Less) => {
                tracing::warn!(
                    entity = entity.as_str(),
                    stored = %stored,
                    candidate = %candidate,
                    "Refusing to move watermark backwards"
                );
                return Ok(CommitOutcome::Regressed { stored });
            }
            // Same key implies same kind, so `None` can't happen here.
            Some(Ordering::Greater) | None => {}
        }
    }

    store.set(&key, &candidate.encode())?;
    tracing::debug!(
        entity = entity.as_str(),
        key = key.as_str(),
        watermark = %candidate,
        backend = store.backend_name(),
        "Watermark committed"
    );
    Ok(CommitOutcome::Advanced)
}

fn parse_stored(key: &CheckpointKey, kind: CursorKind, raw: &str) -> error::Result<Watermark> {
    Watermark::parse(kind, raw).map_err(|source| StateError::CorruptValue {
        key: key.as_str().to_string(),
        source,
    })
}
