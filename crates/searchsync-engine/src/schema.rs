//! Index settings and strict mappings for each entity kind.

use serde::Serialize;
use serde_json::{json, Value};

use searchsync_types::entity::EntityKind;

/// Body of the index creation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSchema {
    pub settings: Value,
    pub mappings: Value,
}

impl IndexSchema {
    /// Shared `ru_en` analysis settings with the mappings for `kind`.
    #[must_use]
    pub fn for_kind(kind: EntityKind) -> Self {
        let mappings = match kind {
            EntityKind::Movie => movie_mappings(),
            EntityKind::Person => person_mappings(),
            EntityKind::Genre => genre_mappings(),
        };
        Self {
            settings: analysis_settings(),
            mappings,
        }
    }
}

fn analysis_settings() -> Value {
    json!({
        "refresh_interval": "1s",
        "analysis": {
            "filter": {
                "english_stop": {"type": "stop", "stopwords": "_english_"},
                "english_stemmer": {"type": "stemmer", "language": "english"},
                "english_possessive_stemmer": {"type": "stemmer", "language": "possessive_english"},
                "russian_stop": {"type": "stop", "stopwords": "_russian_"},
                "russian_stemmer": {"type": "stemmer", "language": "russian"}
            },
            "analyzer": {
                "ru_en": {
                    "tokenizer": "standard",
                    "filter": [
                        "lowercase",
                        "english_stop",
                        "english_stemmer",
                        "english_possessive_stemmer",
                        "russian_stop",
                        "russian_stemmer"
                    ]
                }
            }
        }
    })
}

fn text_with_raw() -> Value {
    json!({"type": "text", "analyzer": "ru_en", "fields": {"raw": {"type": "keyword"}}})
}

fn analyzed_text() -> Value {
    json!({"type": "text", "analyzer": "ru_en"})
}

fn nested_ref() -> Value {
    json!({
        "type": "nested",
        "dynamic": "strict",
        "properties": {
            "id": {"type": "keyword"},
            "name": analyzed_text()
        }
    })
}

fn movie_mappings() -> Value {
    json!({
        "dynamic": "strict",
        "properties": {
            "id": {"type": "keyword"},
            "imdb_rating": {"type": "float"},
            "title": text_with_raw(),
            "description": analyzed_text(),
            "director": analyzed_text(),
            "actors_names": analyzed_text(),
            "writers_names": analyzed_text(),
            "genre": nested_ref(),
            "directors": nested_ref(),
            "actors": nested_ref(),
            "writers": nested_ref(),
            "modified": {"type": "date"}
        }
    })
}

fn person_mappings() -> Value {
    json!({
        "dynamic": "strict",
        "properties": {
            "id": {"type": "keyword"},
            "full_name": text_with_raw(),
            "modified": {"type": "date"}
        }
    })
}

fn genre_mappings() -> Value {
    json!({
        "dynamic": "strict",
        "properties": {
            "id": {"type": "keyword"},
            "genre_name": text_with_raw(),
            "description": {"type": "keyword"},
            "modified": {"type": "date"}
        }
    })
}
