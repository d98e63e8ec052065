//! PostgreSQL connector backed by sqlx

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection as _, PgConnection, Postgres, Row, TypeInfo, ValueRef};
use tracing::debug;

use super::config::{ConfigResolver, ConnectionConfig};
use super::connection::{test_connection, Connection, Connector};
use super::types::{QueryResult, Value};
use crate::error::{DbError, DbResult};

/// Where a [`PgConnector`] gets its parameters from
#[derive(Clone)]
enum ConfigSource {
    Resolve(ConfigResolver),
    Fixed(ConnectionConfig),
}

/// Opens a new `PgConnection` per call and starts a transaction on it
#[derive(Clone)]
pub struct PgConnector {
    source: ConfigSource,
}

impl Default for PgConnector {
    fn default() -> Self {
        Self::new(ConfigResolver::system())
    }
}

impl PgConnector {
    /// Re-resolve the config on every `connect`
    pub fn new(resolver: ConfigResolver) -> Self {
        Self {
            source: ConfigSource::Resolve(resolver),
        }
    }

    /// Always connect with the given parameters
    pub fn fixed(config: ConnectionConfig) -> Self {
        Self {
            source: ConfigSource::Fixed(config),
        }
    }

    async fn config(&self) -> DbResult<ConnectionConfig> {
        match &self.source {
            ConfigSource::Resolve(resolver) => Ok(resolver.resolve().await?),
            ConfigSource::Fixed(config) => Ok(config.clone()),
        }
    }
}

fn connect_options(config: &ConnectionConfig) -> PgConnectOptions {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.user);
    if config.password.is_empty() {
        options
    } else {
        options.password(&config.password)
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self) -> DbResult<Box<dyn Connection>> {
        let config = self.config().await?;
        debug!(url = %config.masked_url(), "Opening database connection");

        let mut conn = PgConnection::connect_with(&connect_options(&config))
            .await
            .map_err(|e| DbError::connection(format!("{}: {}", config.masked_url(), e)))?;

        sqlx::query("BEGIN")
            .execute(&mut conn)
            .await
            .map_err(|e| DbError::transaction(format!("BEGIN failed: {e}")))?;

        Ok(Box::new(PgSession { conn }))
    }
}

/// One physical connection inside an open transaction
struct PgSession {
    conn: PgConnection,
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

/// `{1,NULL,3}`, the way psql prints an array
fn render_array<T: std::fmt::Display>(items: Vec<Option<T>>) -> String {
    let items: Vec<String> = items
        .into_iter()
        .map(|item| item.map_or_else(|| "NULL".to_string(), |v| v.to_string()))
        .collect();
    format!("{{{}}}", items.join(","))
}

/// Raw wire bytes as text, when they are valid UTF-8
fn raw_text(bytes: &[u8]) -> Option<String> {
    std::str::from_utf8(bytes).ok().map(str::to_owned)
}

fn decode_cell(row: &PgRow, idx: usize) -> DbResult<Value> {
    let column = row.column(idx);
    let type_name = column.type_info().name();
    let err = |e: sqlx::Error| DbError::decode(column.name(), e.to_string());

    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(idx).map_err(err)?.map(Value::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)
            .map_err(err)?
            .map(|v| Value::Int(v.into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)
            .map_err(err)?
            .map(|v| Value::Int(v.into())),
        "INT8" => row.try_get::<Option<i64>, _>(idx).map_err(err)?.map(Value::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .map_err(err)?
            .map(|v| Value::Float(v.into())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx).map_err(err)?.map(Value::Float),
        "NUMERIC" => row
            .try_get::<Option<rust_decimal::Decimal>, _>(idx)
            .map_err(err)?
            .map(|v| Value::Text(v.normalize().to_string())),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(idx)
            .map_err(err)?
            .map(|v| Value::Text(v.to_string())),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(idx)
            .map_err(err)?
            .map(|v| Value::Text(v.to_string())),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .map_err(err)?
            .map(|v| Value::Text(v.to_string())),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .map_err(err)?
            .map(|v| Value::Text(v.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .map_err(err)?
            .map(|v| Value::Text(v.to_rfc3339())),
        "INT2[]" => row
            .try_get::<Option<Vec<Option<i16>>>, _>(idx)
            .map_err(err)?
            .map(|v| Value::Text(render_array(v))),
        "INT4[]" => row
            .try_get::<Option<Vec<Option<i32>>>, _>(idx)
            .map_err(err)?
            .map(|v| Value::Text(render_array(v))),
        "INT8[]" => row
            .try_get::<Option<Vec<Option<i64>>>, _>(idx)
            .map_err(err)?
            .map(|v| Value::Text(render_array(v))),
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" => row
            .try_get::<Option<Vec<Option<String>>>, _>(idx)
            .map_err(err)?
            .map(|v| Value::Text(render_array(v))),
        _ => match row.try_get::<Option<String>, _>(idx) {
            Ok(text) => text.map(Value::Text),
            Err(_) => decode_raw(row, idx, type_name)?,
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Last resort for types without a dedicated arm (enums, citext, ...)
fn decode_raw(row: &PgRow, idx: usize, type_name: &str) -> DbResult<Option<Value>> {
    let column = row.column(idx).name();
    let raw = row
        .try_get_raw(idx)
        .map_err(|e| DbError::decode(column, e.to_string()))?;
    if raw.is_null() {
        return Ok(None);
    }
    let bytes = raw
        .as_bytes()
        .map_err(|e| DbError::decode(column, e.to_string()))?;
    raw_text(bytes)
        .map(|text| Some(Value::Text(text)))
        .ok_or_else(|| DbError::decode(column, format!("unsupported column type {type_name}")))
}

#[async_trait]
impl Connection for PgSession {
    async fn query(&mut self, sql: &str, params: &[Value]) -> DbResult<QueryResult> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| DbError::query_with_sql(e.to_string(), sql))?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = rows
            .iter()
            .map(|row| (0..row.len()).map(|idx| decode_cell(row, idx)).collect())
            .collect::<DbResult<Vec<Vec<Value>>>>()?;

        Ok(QueryResult::new(columns, rows))
    }

    async fn commit(&mut self) -> DbResult<()> {
        sqlx::query("COMMIT")
            .execute(&mut self.conn)
            .await
            .map(|_| ())
            .map_err(|e| DbError::transaction(format!("COMMIT failed: {e}")))
    }

    async fn rollback(&mut self) -> DbResult<()> {
        sqlx::query("ROLLBACK")
            .execute(&mut self.conn)
            .await
            .map(|_| ())
            .map_err(|e| DbError::transaction(format!("ROLLBACK failed: {e}")))
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| DbError::connection(e.to_string()))
    }
}

/// Test PostgreSQL connectivity with the given or the resolved config
pub async fn test_database_connection(config: Option<ConnectionConfig>) -> bool {
    let connector = match config {
        Some(config) => PgConnector::fixed(config),
        None => PgConnector::default(),
    };
    test_connection(&connector).await
}
