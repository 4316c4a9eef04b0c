//! Entity identifiers and per-entity classification enums.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of a synced entity type (e.g. `"movies"`).
///
/// Doubles as the destination index name and the checkpoint key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityName(String);

impl EntityName {
    /// Create a new entity name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for EntityName {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Flat checkpoint-store key holding one entity's watermark.
///
/// Layout is `"<entity>_last_id"` for identifier cursors and
/// `"<entity>_last_modified"` for timestamp cursors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointKey(String);

impl CheckpointKey {
    /// Build the key for an entity tracked by the given cursor kind.
    #[must_use]
    pub fn for_entity(entity: &EntityName, cursor: CursorKind) -> Self {
        let suffix = match cursor {
            CursorKind::Uuid | CursorKind::Int64 => "last_id",
            CursorKind::Timestamp => "last_modified",
        };
        Self(format!("{}_{suffix}", entity.as_str()))
    }

    /// Wrap an arbitrary key (e.g. one written by an operator).
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Document shape produced for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Film works with role-grouped people and genres.
    Movie,
    /// People with their full name.
    Person,
    /// Genres with name and description.
    Genre,
}

impl EntityKind {
    /// Wire-format string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Person => "person",
            Self::Genre => "genre",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data type of an entity's watermark cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorKind {
    /// UUID primary key (compared byte-wise, as `PostgreSQL` does).
    Uuid,
    /// Last-modified timestamp.
    #[default]
    Timestamp,
    /// 64-bit integer identifier.
    Int64,
}

impl std::fmt::Display for CursorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uuid => "uuid",
            Self::Timestamp => "timestamp",
            Self::Int64 => "int64",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_name_display_and_as_str() {
        let name = EntityName::new("movies");
        assert_eq!(name.as_str(), "movies");
        assert_eq!(name.to_string(), "movies");
    }

    #[test]
    fn checkpoint_key_layout_follows_cursor_kind() {
        let movies = EntityName::from("movies");
        assert_eq!(
            CheckpointKey::for_entity(&movies, CursorKind::Uuid).as_str(),
            "movies_last_id"
        );
        assert_eq!(
            CheckpointKey::for_entity(&movies, CursorKind::Int64).as_str(),
            "movies_last_id"
        );
        assert_eq!(
            CheckpointKey::for_entity(&movies, CursorKind::Timestamp).as_str(),
            "movies_last_modified"
        );
    }

    #[test]
    fn entity_kind_serde_snake_case() {
        let json = serde_json::to_string(&EntityKind::Movie).unwrap();
        assert_eq!(json, "\"movie\"");
        let back: EntityKind = serde_json::from_str("\"genre\"").unwrap();
        assert_eq!(back, EntityKind::Genre);
    }

    #[test]
    fn cursor_kind_defaults_to_timestamp() {
        assert_eq!(CursorKind::default(), CursorKind::Timestamp);
    }
}
