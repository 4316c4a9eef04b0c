//! Raw rows to index documents.
//!
//! Rows sharing a primary key are grouped in first-seen order and handed to
//! the [`DocumentParser`] of the entity's kind. Documents are produced
//! lazily from [`TransformedBatch::documents`]; a group that fails to parse
//! yields a [`RowError`] in its slot instead of failing the batch.

use std::collections::HashMap;

use serde_json::Value;

use searchsync_types::document::{
    Document, GenreDocument, MovieDocument, NamedRef, PersonDocument,
};
use searchsync_types::entity::EntityKind;
use searchsync_types::row::RawRow;
use searchsync_types::watermark::Watermark;

use crate::config::types::EntityConfig;
use crate::errors::{PipelineError, RowError};

/// Primary key column names, in lookup order.
const ID_COLUMNS: &[&str] = &["id", "key"];

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

/// Builds one document out of all raw rows that share a primary key.
pub trait DocumentParser: Send + Sync {
    /// Parse a non-empty group of rows into a document.
    ///
    /// # Errors
    ///
    /// Returns [`RowError`] when a required column is missing or malformed.
    fn parse(&self, group: &[RawRow]) -> Result<Document, RowError>;
}

/// Parser for an entity kind.
#[must_use]
pub fn parser_for(kind: EntityKind) -> &'static dyn DocumentParser {
    match kind {
        EntityKind::Movie => &MovieParser,
        EntityKind::Person => &PersonParser,
        EntityKind::Genre => &GenreParser,
    }
}

fn require_id(group: &[RawRow]) -> Result<String, RowError> {
    group
        .first()
        .and_then(|row| row.text(ID_COLUMNS))
        .ok_or(RowError::MissingField { column: "id" })
}

/// Film works. People and genres arrive either as `persons` / `genres` JSON
/// arrays or as one flat fragment per row.
pub struct MovieParser;

#[derive(Default)]
struct RoleBuckets {
    actors: Vec<NamedRef>,
    writers: Vec<NamedRef>,
    directors: Vec<NamedRef>,
    genres: Vec<NamedRef>,
}

impl RoleBuckets {
    fn add_person(&mut self, role: &str, person: NamedRef) {
        let bucket = match role.trim().to_ascii_lowercase().as_str() {
            "actor" => &mut self.actors,
            "writer" => &mut self.writers,
            "director" => &mut self.directors,
            _ => return,
        };
        push_unique(bucket, person);
    }

    fn add_genre(&mut self, genre: NamedRef) {
        push_unique(&mut self.genres, genre);
    }
}

fn push_unique(bucket: &mut Vec<NamedRef>, item: NamedRef) {
    if !bucket.iter().any(|existing| existing.id == item.id) {
        bucket.push(item);
    }
}

fn names(refs: &[NamedRef]) -> Vec<String> {
    refs.iter().map(|r| r.name.clone()).collect()
}

fn value_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Person fragment from a JSON object or a flat row. The id falls back to the
/// name when the source only carries names.
fn person_fragment(
    id: Option<String>,
    name: Option<String>,
    role: Option<String>,
    doc_id: &str,
) -> Result<Option<(String, NamedRef)>, RowError> {
    match (id, name, role) {
        (None, None, None) => Ok(None),
        (id, Some(name), Some(role)) => Ok(Some((
            role,
            NamedRef {
                id: id.unwrap_or_else(|| name.clone()),
                name,
            },
        ))),
        (_, None, _) => Err(RowError::InvalidValue {
            id: doc_id.to_string(),
            column: "person_name".to_string(),
            reason: "person fragment without a name".to_string(),
        }),
        (_, Some(_), None) => Err(RowError::InvalidValue {
            id: doc_id.to_string(),
            column: "person_role".to_string(),
            reason: "person fragment without a role".to_string(),
        }),
    }
}

fn genre_fragment(
    id: Option<String>,
    name: Option<String>,
    doc_id: &str,
) -> Result<Option<NamedRef>, RowError> {
    match (id, name) {
        (None, None) => Ok(None),
        (id, Some(name)) => Ok(Some(NamedRef {
            id: id.unwrap_or_else(|| name.clone()),
            name,
        })),
        (Some(_), None) => Err(RowError::InvalidValue {
            id: doc_id.to_string(),
            column: "genre_name".to_string(),
            reason: "genre fragment without a name".to_string(),
        }),
    }
}

fn array_objects(row: &RawRow, column: &str, doc_id: &str) -> Result<Vec<Value>, RowError> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(_) => row.array(column).ok_or_else(|| RowError::InvalidValue {
            id: doc_id.to_string(),
            column: column.to_string(),
            reason: "expected a JSON array".to_string(),
        }),
    }
}

impl MovieParser {
    fn collect(row: &RawRow, doc_id: &str, buckets: &mut RoleBuckets) -> Result<(), RowError> {
        for item in array_objects(row, "persons", doc_id)? {
            let fragment = person_fragment(
                value_text(item.get("person_id")),
                value_text(item.get("person_name")),
                value_text(item.get("person_role")),
                doc_id,
            )?;
            if let Some((role, person)) = fragment {
                buckets.add_person(&role, person);
            }
        }
        for item in array_objects(row, "genres", doc_id)? {
            let fragment = genre_fragment(
                value_text(item.get("genre_id")),
                value_text(item.get("genre_name")),
                doc_id,
            )?;
            if let Some(genre) = fragment {
                buckets.add_genre(genre);
            }
        }

        let flat_person = person_fragment(
            row.text(&["person_id"]),
            row.text(&["person_name", "person"]),
            row.text(&["person_role", "role"]),
            doc_id,
        )?;
        if let Some((role, person)) = flat_person {
            buckets.add_person(&role, person);
        }
        let flat_genre = genre_fragment(row.text(&["genre_id"]), row.text(&["genre_name"]), doc_id)?;
        if let Some(genre) = flat_genre {
            buckets.add_genre(genre);
        }
        Ok(())
    }
}

impl DocumentParser for MovieParser {
    fn parse(&self, group: &[RawRow]) -> Result<Document, RowError> {
        let id = require_id(group)?;
        let first = &group[0];

        let mut buckets = RoleBuckets::default();
        for row in group {
            Self::collect(row, &id, &mut buckets)?;
        }

        let imdb_rating = match first.get_any(&["imdb_rating", "rating"]) {
            None => 0.0,
            Some(_) => first
                .float(&["imdb_rating", "rating"])
                .ok_or_else(|| RowError::InvalidValue {
                    id: id.clone(),
                    column: "rating".to_string(),
                    reason: "not a number".to_string(),
                })?,
        };

        Ok(Document::Movie(MovieDocument {
            imdb_rating,
            genre: buckets.genres,
            title: first.text(&["title"]).unwrap_or_default(),
            description: first.text(&["description"]).unwrap_or_default(),
            director: names(&buckets.directors),
            directors: buckets.directors,
            actors_names: names(&buckets.actors),
            writers_names: names(&buckets.writers),
            actors: buckets.actors,
            writers: buckets.writers,
            modified: first.text(&["modified"]),
            id,
        }))
    }
}

/// People: `id`, `full_name` (or `name`).
pub struct PersonParser;

impl DocumentParser for PersonParser {
    fn parse(&self, group: &[RawRow]) -> Result<Document, RowError> {
        let id = require_id(group)?;
        let first = &group[0];
        let full_name = first
            .text(&["full_name", "name"])
            .ok_or(RowError::MissingField { column: "full_name" })?;
        Ok(Document::Person(PersonDocument {
            id,
            full_name,
            modified: first.text(&["modified"]),
        }))
    }
}

/// Genres: `id`, `genre_name` (or `name`), optional `description`.
pub struct GenreParser;

impl DocumentParser for GenreParser {
    fn parse(&self, group: &[RawRow]) -> Result<Document, RowError> {
        let id = require_id(group)?;
        let first = &group[0];
        let genre_name = first
            .text(&["genre_name", "name"])
            .ok_or(RowError::MissingField { column: "genre_name" })?;
        Ok(Document::Genre(GenreDocument {
            id,
            genre_name,
            description: first.text(&["description"]).unwrap_or_default(),
            modified: first.text(&["modified"]),
        }))
    }
}

// ---------------------------------------------------------------------------
// Batch transform
// ---------------------------------------------------------------------------

/// Output of [`transform`]: the next watermark candidate and the grouped rows
/// waiting to be turned into documents.
pub struct TransformedBatch {
    next_watermark: Watermark,
    malformed: bool,
    rows_in: usize,
    groups: Vec<Vec<RawRow>>,
    parser: &'static dyn DocumentParser,
}

impl std::fmt::Debug for TransformedBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformedBatch")
            .field("next_watermark", &self.next_watermark)
            .field("malformed", &self.malformed)
            .field("rows_in", &self.rows_in)
            .field("groups", &self.groups.len())
            .finish_non_exhaustive()
    }
}

impl TransformedBatch {
    /// Watermark to commit once every document is loaded.
    #[must_use]
    pub fn next_watermark(&self) -> &Watermark {
        &self.next_watermark
    }

    /// The last row's cursor was unreadable and the previous watermark was kept.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        self.malformed
    }

    /// Number of raw rows this batch was built from.
    #[must_use]
    pub fn rows_in(&self) -> usize {
        self.rows_in
    }

    /// Number of documents (distinct primary keys) in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Documents in first-seen key order, parsed on demand.
    pub fn documents(&self) -> impl Iterator<Item = Result<Document, RowError>> + '_ {
        self.groups.iter().map(|group| self.parser.parse(group))
    }
}

/// Group `rows` by primary key and compute the next watermark.
///
/// The next watermark is the cursor value of the last row. When that value
/// is missing, unparseable or behind `previous`, `previous` is kept and the
/// batch is flagged malformed.
///
/// # Errors
///
/// Returns [`PipelineError::NoNewData`] when `rows` is empty.
pub fn transform(
    entity: &EntityConfig,
    previous: &Watermark,
    rows: Vec<RawRow>,
) -> Result<TransformedBatch, PipelineError> {
    let Some(last) = rows.last() else {
        return Err(PipelineError::NoNewData {
            entity: entity.name.to_string(),
        });
    };

    let candidate = Watermark::from_json(entity.cursor, &entity.cursor_field, last.get(&entity.cursor_field));
    let (next_watermark, malformed) = match candidate {
        Ok(wm) if wm.compare(previous) != Some(std::cmp::Ordering::Less) => (wm, false),
        Ok(wm) => {
            tracing::warn!(
                entity = entity.name.as_str(),
                previous = %previous,
                candidate = %wm,
                "Last row cursor is behind the stored watermark, keeping previous"
            );
            (previous.clone(), true)
        }
        Err(e) => {
            tracing::warn!(
                entity = entity.name.as_str(),
                cursor_field = entity.cursor_field.as_str(),
                error = %e,
                "Malformed cursor in last row, keeping previous watermark"
            );
            (previous.clone(), true)
        }
    };

    let rows_in = rows.len();
    let groups = group_by_id(rows);

    Ok(TransformedBatch {
        next_watermark,
        malformed,
        rows_in,
        groups,
        parser: parser_for(entity.kind),
    })
}

/// Rows without a primary key each become a group of their own (and later a
/// `RowError`).
fn group_by_id(rows: Vec<RawRow>) -> Vec<Vec<RawRow>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<RawRow>> = Vec::new();
    for row in rows {
        match row.text(ID_COLUMNS) {
            Some(id) => {
                if let Some(&i) = index.get(&id) {
                    groups[i].push(row);
                } else {
                    index.insert(id, groups.len());
                    groups.push(vec![row]);
                }
            }
            None => groups.push(vec![row]),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchsync_types::entity::{CursorKind, EntityName};
    use serde_json::json;

    fn row(value: Value) -> RawRow {
        RawRow::try_from(value).unwrap()
    }

    fn entity(kind: EntityKind, cursor: CursorKind, cursor_field: &str) -> EntityConfig {
        EntityConfig {
            name: EntityName::new("movies"),
            kind,
            cursor,
            cursor_field: cursor_field.to_string(),
            query: None,
        }
    }

    fn movie(doc: Result<Document, RowError>) -> MovieDocument {
        match doc.unwrap() {
            Document::Movie(m) => m,
            other => panic!("expected movie, got {other:?}"),
        }
    }

    #[test]
    fn flat_role_rows_group_into_one_document() {
        let rows = vec![
            row(json!({"key": "f1", "role": "actor", "person": "A"})),
            row(json!({"key": "f1", "role": "writer", "person": "B"})),
        ];
        let doc = movie(MovieParser.parse(&rows));
        assert_eq!(doc.id, "f1");
        assert_eq!(doc.actors_names, vec!["A"]);
        assert_eq!(doc.writers_names, vec!["B"]);
        assert!(doc.directors.is_empty());
        assert!(doc.director.is_empty());
    }

    #[test]
    fn aggregated_arrays_fill_every_bucket() {
        let rows = vec![row(json!({
            "id": "fw-1",
            "title": "Star Wars",
            "description": "Space",
            "rating": 8.6,
            "modified": "2021-06-16 20:14:09.22+00",
            "persons": [
                {"person_role": "director", "person_id": "p1", "person_name": "George Lucas"},
                {"person_role": "actor", "person_id": "p2", "person_name": "Mark Hamill"},
                {"person_role": "writer", "person_id": "p1", "person_name": "George Lucas"},
                {"person_role": "producer", "person_id": "p9", "person_name": "Nobody"}
            ],
            "genres": [{"genre_id": "g1", "genre_name": "Sci-Fi"}]
        }))];
        let doc = movie(MovieParser.parse(&rows));
        assert_eq!(doc.title, "Star Wars");
        assert!((doc.imdb_rating - 8.6).abs() < f64::EPSILON);
        assert_eq!(doc.director, vec!["George Lucas"]);
        assert_eq!(doc.directors[0].id, "p1");
        assert_eq!(doc.actors, vec![NamedRef { id: "p2".into(), name: "Mark Hamill".into() }]);
        assert_eq!(doc.writers_names, vec!["George Lucas"]);
        assert_eq!(doc.genre, vec![NamedRef { id: "g1".into(), name: "Sci-Fi".into() }]);
        assert_eq!(doc.modified.as_deref(), Some("2021-06-16 20:14:09.22+00"));
    }

    #[test]
    fn duplicate_fragments_collapse() {
        let rows = vec![
            row(json!({"id": "f1", "person_role": "actor", "person_id": "p1", "person_name": "A", "genre_id": "g1", "genre_name": "Drama"})),
            row(json!({"id": "f1", "person_role": "actor", "person_id": "p1", "person_name": "A", "genre_id": "g2", "genre_name": "Comedy"})),
        ];
        let doc = movie(MovieParser.parse(&rows));
        assert_eq!(doc.actors.len(), 1);
        assert_eq!(doc.genre.len(), 2);
    }

    #[test]
    fn movie_defaults_when_optional_columns_absent() {
        let doc = movie(MovieParser.parse(&[row(json!({"id": "f1"}))]));
        assert!(doc.imdb_rating.abs() < f64::EPSILON);
        assert_eq!(doc.description, "");
        assert!(doc.genre.is_empty());
    }

    #[test]
    fn numeric_rating_text_is_accepted() {
        let doc = movie(MovieParser.parse(&[row(json!({"id": "f1", "rating": "7.5"}))]));
        assert!((doc.imdb_rating - 7.5).abs() < f64::EPSILON);
    }

    #[test]
    fn person_fragment_without_role_is_a_row_error() {
        let rows = vec![row(json!({"id": "f1", "persons": [{"person_id": "p1", "person_name": "A"}]}))];
        let err = MovieParser.parse(&rows).unwrap_err();
        assert!(matches!(err, RowError::InvalidValue { ref column, .. } if column == "person_role"));
    }

    #[test]
    fn person_and_genre_parsers_accept_name_alias() {
        let person = PersonParser.parse(&[row(json!({"id": 7, "name": "Ann"}))]).unwrap();
        assert_eq!(person.id(), "7");
        let genre = GenreParser
            .parse(&[row(json!({"id": "g1", "name": "Drama", "description": null}))])
            .unwrap();
        match genre {
            Document::Genre(g) => {
                assert_eq!(g.genre_name, "Drama");
                assert_eq!(g.description, "");
            }
            other => panic!("expected genre, got {other:?}"),
        }
    }

    #[test]
    fn person_without_name_is_missing_field() {
        let err = PersonParser.parse(&[row(json!({"id": "p1"}))]).unwrap_err();
        assert_eq!(err, RowError::MissingField { column: "full_name" });
    }

    #[test]
    fn empty_batch_is_no_new_data() {
        let e = entity(EntityKind::Movie, CursorKind::Uuid, "id");
        let err = transform(&e, &Watermark::minimum(CursorKind::Uuid), Vec::new()).unwrap_err();
        assert!(matches!(err, PipelineError::NoNewData { .. }));
    }

    #[test]
    fn next_watermark_is_last_row_cursor_and_order_is_first_seen() {
        let e = entity(EntityKind::Movie, CursorKind::Int64, "id");
        let rows = vec![
            row(json!({"id": 3, "title": "c"})),
            row(json!({"id": 1, "title": "a"})),
            row(json!({"id": 3, "title": "c"})),
            row(json!({"id": 5, "title": "e"})),
        ];
        let batch = transform(&e, &Watermark::minimum(CursorKind::Int64), rows).unwrap();
        assert_eq!(batch.next_watermark(), &Watermark::Int64 { value: 5 });
        assert!(!batch.is_malformed());
        assert_eq!(batch.rows_in(), 4);
        assert_eq!(batch.len(), 3);
        let ids: Vec<String> = batch
            .documents()
            .map(|d| d.unwrap().id().to_string())
            .collect();
        assert_eq!(ids, vec!["3", "1", "5"]);
    }

    #[test]
    fn malformed_last_cursor_keeps_previous_watermark() {
        let e = entity(EntityKind::Person, CursorKind::Timestamp, "modified");
        let previous = Watermark::parse(CursorKind::Timestamp, "2024-01-01T00:00:00Z").unwrap();
        let rows = vec![
            row(json!({"id": "p1", "full_name": "A", "modified": "2024-02-01T00:00:00Z"})),
            row(json!({"id": "p2", "full_name": "B", "modified": "not a date"})),
        ];
        let batch = transform(&e, &previous, rows).unwrap();
        assert!(batch.is_malformed());
        assert_eq!(batch.next_watermark(), &previous);
        assert_eq!(batch.documents().filter(Result::is_ok).count(), 2);
    }

    #[test]
    fn regressing_cursor_keeps_previous_watermark() {
        let e = entity(EntityKind::Person, CursorKind::Int64, "id");
        let previous = Watermark::Int64 { value: 100 };
        let rows = vec![row(json!({"id": 4, "full_name": "A"}))];
        let batch = transform(&e, &previous, rows).unwrap();
        assert!(batch.is_malformed());
        assert_eq!(batch.next_watermark(), &previous);
    }

    #[test]
    fn row_without_id_becomes_a_row_error() {
        let e = entity(EntityKind::Genre, CursorKind::Timestamp, "modified");
        let rows = vec![
            row(json!({"name": "orphan", "modified": "2024-01-01T00:00:00Z"})),
            row(json!({"id": "g1", "name": "Drama", "modified": "2024-01-02T00:00:00Z"})),
        ];
        let batch = transform(&e, &Watermark::minimum(CursorKind::Timestamp), rows).unwrap();
        let results: Vec<_> = batch.documents().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Err(RowError::MissingField { column: "id" }));
        assert!(results[1].is_ok());
    }
}
