//! Incremental reads from the `PostgreSQL` source.
//!
//! Each entity's query is prepared once per connection. `$1` is bound to the
//! encoded watermark as text (the query casts it, e.g. `$1::text::uuid`) and
//! `$2` to the batch size. Rows come back as [`RawRow`]s, with every column
//! converted to JSON according to its `PostgreSQL` type.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Config as PgConfig, NoTls, Row, Statement};
use uuid::Uuid;

use searchsync_types::row::RawRow;
use searchsync_types::watermark::Watermark;

use crate::config::types::{EntityConfig, SourceConfig};
use crate::errors::PipelineError;

/// Reads the rows changed since a watermark.
#[allow(async_fn_in_trait)]
pub trait Extractor {
    /// Return at most one batch of rows whose cursor is strictly greater than
    /// `watermark`, ascending by cursor. An empty vector is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SourceUnavailable`] on connection or query
    /// failure and [`PipelineError::Config`] when the query itself is unusable.
    async fn extract(
        &mut self,
        entity: &EntityConfig,
        watermark: &Watermark,
    ) -> Result<Vec<RawRow>, PipelineError>;
}

// ---------------------------------------------------------------------------
// PostgresExtractor
// ---------------------------------------------------------------------------

/// Batch size parameter in whichever integer width the query asked for.
enum LimitParam {
    Int8(i64),
    Int4(i32),
}

impl LimitParam {
    fn as_tosql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Int8(v) => v,
            Self::Int4(v) => v,
        }
    }
}

/// [`Extractor`] over a lazily (re)connected `tokio-postgres` client.
pub struct PostgresExtractor {
    config: PgConfig,
    endpoint: String,
    batch_size: u32,
    client: Option<Client>,
    statements: HashMap<String, Statement>,
}

impl PostgresExtractor {
    #[must_use]
    pub fn new(source: &SourceConfig, batch_size: u32) -> Self {
        let mut config = PgConfig::new();
        config.host(&source.host);
        config.port(source.port);
        config.user(&source.user);
        if !source.password.is_empty() {
            config.password(&source.password);
        }
        config.dbname(&source.database);
        config.application_name("searchsync");
        Self {
            config,
            endpoint: format!("{}:{}/{}", source.host, source.port, source.database),
            batch_size,
            client: None,
            statements: HashMap::new(),
        }
    }

    async fn client(&mut self) -> Result<&Client, PipelineError> {
        let needs_connect = self.client.as_ref().map_or(true, Client::is_closed);
        if needs_connect {
            self.statements.clear();
            let (client, connection) = self
                .config
                .connect(NoTls)
                .await
                .map_err(|e| PipelineError::source_unavailable(&format!("connect {}", self.endpoint), e))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::warn!(error = %e, "PostgreSQL connection closed with error");
                }
            });
            tracing::debug!(endpoint = self.endpoint.as_str(), "Connected to source");
            self.client = Some(client);
        }
        self.client
            .as_ref()
            .ok_or_else(|| PipelineError::SourceUnavailable("client not connected".to_string()))
    }

    /// Run `SELECT 1` against the source.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SourceUnavailable`] when the source is unreachable.
    pub async fn check(&mut self) -> Result<(), PipelineError> {
        let client = self.client().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| PipelineError::source_unavailable("connection test", e))?;
        Ok(())
    }

    async fn statement(&mut self, entity: &EntityConfig) -> Result<Statement, PipelineError> {
        if let Some(stmt) = self.statements.get(entity.name.as_str()) {
            return Ok(stmt.clone());
        }
        let client = self.client().await?;
        let stmt = client
            .prepare(entity.query_text())
            .await
            .map_err(|e| classify_query_error(entity, "prepare", &e))?;
        check_params(entity, stmt.params())?;
        self.statements
            .insert(entity.name.as_str().to_string(), stmt.clone());
        Ok(stmt)
    }

    fn drop_connection(&mut self) {
        self.client = None;
        self.statements.clear();
    }
}

impl Extractor for PostgresExtractor {
    async fn extract(
        &mut self,
        entity: &EntityConfig,
        watermark: &Watermark,
    ) -> Result<Vec<RawRow>, PipelineError> {
        let stmt = self.statement(entity).await?;
        let limit = match stmt.params().get(1) {
            Some(&Type::INT4) => LimitParam::Int4(i32::try_from(self.batch_size).unwrap_or(i32::MAX)),
            _ => LimitParam::Int8(i64::from(self.batch_size)),
        };
        let cursor = watermark.encode();

        let client = self.client().await?;
        let rows = match client.query(&stmt, &[&cursor, limit.as_tosql()]).await {
            Ok(rows) => rows,
            Err(e) => {
                let err = classify_query_error(entity, "query", &e);
                if err.is_transient() {
                    self.drop_connection();
                }
                return Err(err);
            }
        };

        tracing::debug!(
            entity = entity.name.as_str(),
            watermark = cursor.as_str(),
            rows = rows.len(),
            "Extracted batch"
        );
        rows.iter().map(|row| row_to_raw(entity, row)).collect()
    }
}

/// Syntax, permission and undefined-object errors (SQLSTATE class 42) are a
/// broken query, not an outage.
fn classify_query_error(
    entity: &EntityConfig,
    phase: &str,
    err: &tokio_postgres::Error,
) -> PipelineError {
    match err.code() {
        Some(code) if code.code().starts_with("42") && *code != SqlState::UNDEFINED_TABLE => {
            PipelineError::Config(format!("{phase} for entity '{}' failed: {err}", entity.name))
        }
        _ => PipelineError::source_unavailable(&format!("{phase} entity '{}'", entity.name), err),
    }
}

fn check_params(entity: &EntityConfig, params: &[Type]) -> Result<(), PipelineError> {
    if params.len() != 2 {
        return Err(PipelineError::Config(format!(
            "query for entity '{}' must take exactly two parameters ($1 watermark, $2 batch size), found {}",
            entity.name,
            params.len()
        )));
    }
    if !matches!(params[0], Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::UNKNOWN) {
        return Err(PipelineError::Config(format!(
            "query for entity '{}' binds $1 as {}; cast it from text instead (e.g. $1::text::{})",
            entity.name, params[0], params[0]
        )));
    }
    if !matches!(params[1], Type::INT8 | Type::INT4) {
        return Err(PipelineError::Config(format!(
            "query for entity '{}' binds $2 as {}; it must be an integer (LIMIT $2)",
            entity.name, params[1]
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

fn row_to_raw(entity: &EntityConfig, row: &Row) -> Result<RawRow, PipelineError> {
    let mut raw = RawRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = column_value(row, idx, column.type_()).map_err(|e| match e {
            ColumnError::Unsupported => PipelineError::Config(format!(
                "entity '{}': column '{}' has unsupported type {}; cast it in the query (e.g. ::text)",
                entity.name,
                column.name(),
                column.type_()
            )),
            ColumnError::Decode(e) => PipelineError::source_unavailable(
                &format!("decode column '{}' of entity '{}'", column.name(), entity.name),
                e,
            ),
        })?;
        raw.insert(column.name(), value);
    }
    Ok(raw)
}

enum ColumnError {
    Unsupported,
    Decode(tokio_postgres::Error),
}

impl From<tokio_postgres::Error> for ColumnError {
    fn from(e: tokio_postgres::Error) -> Self {
        Self::Decode(e)
    }
}

fn get<'a, T>(row: &'a Row, idx: usize) -> Result<Option<T>, ColumnError>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    Ok(row.try_get::<_, Option<T>>(idx)?)
}

fn opt_json<T: Into<Value>>(value: Option<T>) -> Value {
    value.map_or(Value::Null, Into::into)
}

fn column_value(row: &Row, idx: usize, ty: &Type) -> Result<Value, ColumnError> {
    let value = match *ty {
        Type::BOOL => opt_json(get::<bool>(row, idx)?),
        Type::INT2 => opt_json(get::<i16>(row, idx)?),
        Type::INT4 => opt_json(get::<i32>(row, idx)?),
        Type::INT8 => opt_json(get::<i64>(row, idx)?),
        Type::FLOAT4 => opt_json(get::<f32>(row, idx)?.map(f64::from)),
        Type::FLOAT8 => opt_json(get::<f64>(row, idx)?),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => opt_json(get::<String>(row, idx)?),
        Type::UUID => opt_json(get::<Uuid>(row, idx)?.map(|u| u.hyphenated().to_string())),
        Type::TIMESTAMPTZ => opt_json(
            get::<DateTime<Utc>>(row, idx)?
                .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        ),
        Type::TIMESTAMP => opt_json(
            get::<NaiveDateTime>(row, idx)?.map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        ),
        Type::DATE => opt_json(get::<NaiveDate>(row, idx)?.map(|d| d.to_string())),
        Type::JSON | Type::JSONB => get::<Value>(row, idx)?.unwrap_or(Value::Null),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => opt_json(get::<Vec<String>>(row, idx)?),
        Type::UUID_ARRAY => opt_json(
            get::<Vec<Uuid>>(row, idx)?
                .map(|ids| ids.iter().map(|u| u.hyphenated().to_string()).collect::<Vec<_>>()),
        ),
        _ => return Err(ColumnError::Unsupported),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchsync_types::entity::{CursorKind, EntityKind, EntityName};

    fn entity() -> EntityConfig {
        EntityConfig {
            name: EntityName::new("movies"),
            kind: EntityKind::Movie,
            cursor: CursorKind::Uuid,
            cursor_field: "id".into(),
            query: None,
        }
    }

    #[test]
    fn params_must_be_text_then_integer() {
        assert!(check_params(&entity(), &[Type::TEXT, Type::INT8]).is_ok());
        assert!(check_params(&entity(), &[Type::VARCHAR, Type::INT4]).is_ok());

        let err = check_params(&entity(), &[Type::UUID, Type::INT8]).unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("$1::text::uuid"), "got: {err}");

        let err = check_params(&entity(), &[Type::TEXT]).unwrap_err();
        assert!(err.to_string().contains("exactly two parameters"));

        let err = check_params(&entity(), &[Type::TEXT, Type::TEXT]).unwrap_err();
        assert!(err.to_string().contains("$2"));
    }

    #[test]
    fn new_extractor_is_disconnected() {
        let source = SourceConfig {
            host: "localhost".into(),
            port: 5432,
            user: "app".into(),
            password: String::new(),
            database: "movies".into(),
        };
        let extractor = PostgresExtractor::new(&source, 100);
        assert!(extractor.client.is_none());
        assert_eq!(extractor.endpoint, "localhost:5432/movies");
    }

    #[test]
    fn opt_json_maps_none_to_null() {
        assert_eq!(opt_json::<i64>(None), Value::Null);
        assert_eq!(opt_json(Some(3_i64)), serde_json::json!(3));
    }
}
