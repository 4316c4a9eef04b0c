//! Raw source rows as handed from the extractor to the transformer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One flat or pre-joined record read from the source.
///
/// Column values are kept as JSON so that pre-aggregated join arrays
/// (`json_agg(...)`) and scalar columns travel through the same shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRow(Map<String, Value>);

impl RawRow {
    /// Create an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Set a column value.
    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.0.insert(column.into(), value);
    }

    /// Raw column value, `None` when the column is absent.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// First non-null value among the candidate column names.
    #[must_use]
    pub fn get_any(&self, columns: &[&str]) -> Option<&Value> {
        columns
            .iter()
            .filter_map(|c| self.0.get(*c))
            .find(|v| !v.is_null())
    }

    /// Column rendered as a string: strings as-is, numbers via `to_string`.
    #[must_use]
    pub fn text(&self, columns: &[&str]) -> Option<String> {
        match self.get_any(columns)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Column as a float, accepting numeric strings (e.g. `numeric::text`).
    #[must_use]
    pub fn float(&self, columns: &[&str]) -> Option<f64> {
        match self.get_any(columns)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Column as a JSON array. A JSON-encoded string holding an array is decoded.
    #[must_use]
    pub fn array(&self, column: &str) -> Option<Vec<Value>> {
        match self.0.get(column)? {
            Value::Array(items) => Some(items.clone()),
            Value::String(s) => match serde_json::from_str::<Value>(s).ok()? {
                Value::Array(items) => Some(items),
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<Map<String, Value>> for RawRow {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for RawRow {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> RawRow {
        RawRow::try_from(value).unwrap()
    }

    #[test]
    fn text_renders_numbers() {
        let r = row(json!({"id": 42}));
        assert_eq!(r.text(&["id"]), Some("42".to_string()));
    }

    #[test]
    fn get_any_skips_null_candidates() {
        let r = row(json!({"person_role": null, "role": "actor"}));
        assert_eq!(r.text(&["person_role", "role"]), Some("actor".to_string()));
    }

    #[test]
    fn float_parses_numeric_text() {
        let r = row(json!({"rating": "7.5"}));
        assert_eq!(r.float(&["rating"]), Some(7.5));
    }

    #[test]
    fn array_decodes_json_text() {
        let r = row(json!({"persons": "[{\"person_id\": \"p1\"}]"}));
        let items = r.array("persons").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["person_id"], "p1");
    }

    #[test]
    fn non_object_value_is_rejected() {
        assert!(RawRow::try_from(json!([1, 2])).is_err());
    }
}
