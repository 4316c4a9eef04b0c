//! Bulk upserts into the search index.

use std::fmt::Write as _;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};

use searchsync_types::document::Document;

use crate::config::types::IndexConfig;
use crate::errors::PipelineError;
use crate::result::{ItemFailure, LoadOutcome};
use crate::schema::IndexSchema;

/// Writes documents into named indices.
#[allow(async_fn_in_trait)]
pub trait Loader {
    /// Create `index` with `schema` unless it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::IndexUnavailable`] when the index can't be
    /// checked or created.
    async fn ensure_index(&mut self, index: &str, schema: &IndexSchema) -> Result<(), PipelineError>;

    /// Upsert `docs` into `index`, replacing any document with the same `id`.
    ///
    /// Per-document rejections are reported in the [`LoadOutcome`], not as an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::IndexUnavailable`] when the request as a whole fails.
    async fn load(&mut self, index: &str, docs: &[Document]) -> Result<LoadOutcome, PipelineError>;
}

// ---------------------------------------------------------------------------
// ElasticsearchLoader
// ---------------------------------------------------------------------------

/// [`Loader`] speaking the Elasticsearch REST API.
pub struct ElasticsearchLoader {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticsearchLoader {
    /// Build a client for `config.url`; every request is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the HTTP client can't be built.
    pub fn new(config: &IndexConfig, timeout: Duration) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("searchsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Probe the cluster root endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::IndexUnavailable`] if the cluster doesn't answer 2xx.
    pub async fn check(&self) -> Result<(), PipelineError> {
        let response = self
            .authed(self.client.get(self.url("/")))
            .send()
            .await
            .map_err(|e| PipelineError::index_unavailable("cluster probe", e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(PipelineError::IndexUnavailable(format!(
                "cluster probe: HTTP {}",
                response.status()
            )))
        }
    }

    /// `HEAD /{index}`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::IndexUnavailable`] on transport errors or
    /// statuses other than 200/404.
    pub async fn exists(&self, index: &str) -> Result<bool, PipelineError> {
        let response = self
            .authed(self.client.head(self.url(index)))
            .send()
            .await
            .map_err(|e| PipelineError::index_unavailable(&format!("check index '{index}'"), e))?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(PipelineError::IndexUnavailable(format!(
                "check index '{index}': HTTP {status}"
            ))),
        }
    }

    /// `PUT /{index}` with settings and mappings. An index created concurrently
    /// counts as success.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] when the index rejects the schema and
    /// [`PipelineError::IndexUnavailable`] on transport or server errors.
    pub async fn create(&self, index: &str, schema: &IndexSchema) -> Result<(), PipelineError> {
        let response = self
            .authed(self.client.put(self.url(index)))
            .json(schema)
            .send()
            .await
            .map_err(|e| PipelineError::index_unavailable(&format!("create index '{index}'"), e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let error_type = body["error"]["type"].as_str().unwrap_or_default();
        if error_type == "resource_already_exists_exception" {
            return Ok(());
        }
        let reason = body["error"]["reason"].as_str().unwrap_or(error_type);
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            Err(PipelineError::Config(format!(
                "index '{index}' rejected its schema (HTTP {status}): {reason}"
            )))
        } else {
            Err(PipelineError::IndexUnavailable(format!(
                "create index '{index}': HTTP {status}: {reason}"
            )))
        }
    }
}

impl Loader for ElasticsearchLoader {
    async fn ensure_index(&mut self, index: &str, schema: &IndexSchema) -> Result<(), PipelineError> {
        if self.exists(index).await? {
            tracing::debug!(index, "Index already exists");
            return Ok(());
        }
        self.create(index, schema).await?;
        tracing::info!(index, "Created index");
        Ok(())
    }

    async fn load(&mut self, index: &str, docs: &[Document]) -> Result<LoadOutcome, PipelineError> {
        if docs.is_empty() {
            return Ok(LoadOutcome::default());
        }
        let body = bulk_body(index, docs)?;
        let response = self
            .authed(self.client.post(self.url("/_bulk?refresh=false")))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| PipelineError::index_unavailable(&format!("bulk into '{index}'"), e))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::IndexUnavailable(format!(
                "bulk into '{index}': HTTP {status}: {}",
                truncate(&text, 512)
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::index_unavailable(&format!("bulk response from '{index}'"), e))?;
        Ok(parse_bulk_response(docs, &body))
    }
}

/// NDJSON body: an `index` action with `_id` followed by the document source.
pub(crate) fn bulk_body(index: &str, docs: &[Document]) -> Result<String, PipelineError> {
    let mut body = String::new();
    for doc in docs {
        let action = json!({"index": {"_index": index, "_id": doc.id()}});
        let source = serde_json::to_string(doc).map_err(|e| {
            PipelineError::Config(format!("document {} can't be serialized: {e}", doc.id()))
        })?;
        // Writing to a String can't fail.
        let _ = writeln!(body, "{action}");
        let _ = writeln!(body, "{source}");
    }
    Ok(body)
}

/// Count accepted and rejected items. Items the response doesn't mention are
/// counted as failed.
pub(crate) fn parse_bulk_response(docs: &[Document], body: &Value) -> LoadOutcome {
    let items = body["items"].as_array().map_or(&[][..], Vec::as_slice);
    let mut outcome = LoadOutcome::default();

    for (i, doc) in docs.iter().enumerate() {
        let Some(item) = items.get(i) else {
            outcome.record_failure(ItemFailure {
                id: doc.id().to_string(),
                status: 0,
                reason: "missing from bulk response".to_string(),
            });
            continue;
        };
        let result = item.get("index").unwrap_or(item);
        let status = result["status"]
            .as_u64()
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(0);
        let error = &result["error"];
        if error.is_null() && (200..300).contains(&status) {
            outcome.succeeded += 1;
        } else {
            let reason = error["reason"]
                .as_str()
                .or_else(|| error["type"].as_str())
                .map_or_else(|| format!("HTTP {status}"), str::to_string);
            outcome.record_failure(ItemFailure {
                id: result["_id"].as_str().unwrap_or(doc.id()).to_string(),
                status,
                reason,
            });
        }
    }
    outcome
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchsync_types::document::PersonDocument;

    fn person(id: &str) -> Document {
        Document::Person(PersonDocument {
            id: id.into(),
            full_name: format!("Person {id}"),
            modified: None,
        })
    }

    #[test]
    fn bulk_body_pairs_action_and_source_lines() {
        let body = bulk_body("persons", &[person("p1"), person("p2")]).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action, json!({"index": {"_index": "persons", "_id": "p1"}}));
        let source: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(source, json!({"id": "p1", "full_name": "Person p1"}));
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn bulk_response_counts_successes_and_failures() {
        let docs = [person("p1"), person("p2"), person("p3")];
        let body = json!({
            "errors": true,
            "items": [
                {"index": {"_id": "p1", "status": 201, "result": "created"}},
                {"index": {"_id": "p2", "status": 400, "error": {"type": "strict_dynamic_mapping_exception", "reason": "mapping set to strict"}}},
                {"index": {"_id": "p3", "status": 200, "result": "updated"}}
            ]
        });
        let outcome = parse_bulk_response(&docs, &body);
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(
            outcome.failures,
            vec![ItemFailure {
                id: "p2".into(),
                status: 400,
                reason: "mapping set to strict".into()
            }]
        );
    }

    #[test]
    fn items_missing_from_response_are_failures() {
        let docs = [person("p1"), person("p2")];
        let body = json!({"items": [{"index": {"_id": "p1", "status": 201}}]});
        let outcome = parse_bulk_response(&docs, &body);
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failures[0].id, "p2");
        assert_eq!(outcome.failures[0].status, 0);
    }

    #[test]
    fn url_joins_without_double_slash() {
        let loader = ElasticsearchLoader::new(
            &IndexConfig {
                url: "http://localhost:9200/".into(),
                username: None,
                password: None,
            },
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(loader.url("/_bulk"), "http://localhost:9200/_bulk");
        assert_eq!(loader.url("movies"), "http://localhost:9200/movies");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("фильм", 2), "фи");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
