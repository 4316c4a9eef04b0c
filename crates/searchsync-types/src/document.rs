//! Denormalized documents written to the search index.
//!
//! Field names follow the index mappings exactly; mappings are strict, so a
//! renamed field here is a rejected document there.

use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;

/// Id + name pair used for every role bucket and for genres.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedRef {
    pub id: String,
    pub name: String,
}

/// Film work with its people grouped by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieDocument {
    pub id: String,
    pub imdb_rating: f64,
    pub genre: Vec<NamedRef>,
    pub title: String,
    pub description: String,
    /// Director names (flattened form of `directors`).
    pub director: Vec<String>,
    pub directors: Vec<NamedRef>,
    pub actors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub actors: Vec<NamedRef>,
    pub writers: Vec<NamedRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonDocument {
    pub id: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenreDocument {
    pub id: String,
    pub genre_name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

/// Any document the pipeline can produce.
///
/// Serializes as the bare document body (no variant tag), which is what the
/// bulk API expects as `_source`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Document {
    Movie(MovieDocument),
    Person(PersonDocument),
    Genre(GenreDocument),
}

impl Document {
    /// Primary key, used as the index `_id`.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Movie(d) => &d.id,
            Self::Person(d) => &d.id,
            Self::Genre(d) => &d.id,
        }
    }

    /// Entity kind this document belongs to.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Movie(_) => EntityKind::Movie,
            Self::Person(_) => EntityKind::Person,
            Self::Genre(_) => EntityKind::Genre,
        }
    }
}
