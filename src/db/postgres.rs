//! PostgreSQL / Greenplum driver on top of `sqlx`.
//!
//! Each pool slot owns a plain `PgConnection`. Transactions are driven with
//! explicit `BEGIN` / `COMMIT` / `ROLLBACK` statements on that connection, so
//! the handle can keep a transaction open across calls without borrowing the
//! connection.
//!
//! Statements go over the simple query protocol, so every result column
//! arrives in text format and types without a decoder still read as text.

use crate::config::DEFAULT_CONNECT_TIMEOUT_SECS;
use crate::db::driver::{Driver, DriverConnection};
use crate::db::types::{TypeCategory, categorize_type};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionInfo, ExecResult, Row, Value};
use rust_decimal::Decimal;
use sqlx::error::BoxDynError;
use sqlx::postgres::{
    PgConnectOptions, PgConnection, PgRow, PgTypeInfo, PgValueFormat, PgValueRef,
};
use sqlx::{Column, ConnectOptions, Connection, Decode, Executor, Row as _, Type, TypeInfo};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

pub const DEFAULT_APPLICATION_NAME: &str = "pg-dbconn";

/// Opens `PgConnection`s described by a [`ConnectionInfo`].
///
/// Anything not carried by `ConnectionInfo` (password, TLS mode, passfile)
/// comes from the usual `PG*` environment variables.
#[derive(Clone)]
pub struct PgDriver {
    application_name: String,
    connect_timeout: Duration,
    password: Option<String>,
}

impl PgDriver {
    pub fn new() -> Self {
        Self {
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            password: None,
        }
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Overrides `PGPASSWORD` and the passfile.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    fn connect_options(&self, info: &ConnectionInfo) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&info.host)
            .port(info.port)
            .username(&info.user)
            .database(&info.dbname)
            .application_name(&self.application_name)
            .statement_cache_capacity(0);
        match &self.password {
            Some(password) => options.password(password),
            None => options,
        }
    }
}

impl std::fmt::Debug for PgDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgDriver")
            .field("application_name", &self.application_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Default for PgDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for PgDriver {
    type Connection = PgDriverConnection;

    async fn connect(&self, info: &ConnectionInfo) -> DbResult<PgDriverConnection> {
        let options = self.connect_options(info);
        debug!(url = %info.connection_url(), "Opening connection");

        match timeout(self.connect_timeout, options.connect()).await {
            Ok(Ok(conn)) => Ok(PgDriverConnection { conn }),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(DbError::timeout("connect", self.connect_timeout.as_secs())),
        }
    }
}

/// A single pool slot backed by `sqlx`.
#[derive(Debug)]
pub struct PgDriverConnection {
    conn: PgConnection,
}

impl DriverConnection for PgDriverConnection {
    async fn execute(&mut self, sql: &str) -> DbResult<ExecResult> {
        let result = (&mut self.conn).execute(sql).await?;
        Ok(ExecResult::new(result.rows_affected()))
    }

    async fn fetch_all(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        let rows = (&mut self.conn).fetch_all(sql).await?;
        decode_rows(&rows)
    }

    async fn begin(&mut self) -> DbResult<()> {
        (&mut self.conn).execute("BEGIN").await?;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        (&mut self.conn).execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        (&mut self.conn).execute("ROLLBACK").await?;
        Ok(())
    }

    async fn current_user(&mut self) -> DbResult<String> {
        let user = sqlx::query_scalar::<_, String>("SELECT current_user::text")
            .fetch_one(&mut self.conn)
            .await?;
        Ok(user)
    }

    async fn close(self) -> DbResult<()> {
        self.conn.close().await?;
        Ok(())
    }
}

// =============================================================================
// Row Decoding
// =============================================================================

fn decode_rows(rows: &[PgRow]) -> DbResult<Vec<Row>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };

    let columns: Arc<[String]> = first
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let categories: Vec<TypeCategory> = first
        .columns()
        .iter()
        .map(|c| categorize_type(c.type_info().name()))
        .collect();

    rows.iter()
        .map(|row| {
            let values = categories
                .iter()
                .enumerate()
                .map(|(idx, category)| decode_column(row, idx, *category))
                .collect::<DbResult<Vec<_>>>()?;
            Ok(Row::new(Arc::clone(&columns), values))
        })
        .collect()
}

fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> DbResult<Value> {
    match category {
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Decimal => match row.try_get::<Option<Decimal>, _>(idx) {
            Ok(v) => Ok(v.map(|d| d.to_string()).into()),
            // NaN and values wider than 28 digits keep the server's rendering
            Err(_) => decode_text(row, idx),
        },
        TypeCategory::Boolean => Ok(row.try_get::<Option<bool>, _>(idx)?.into()),
        TypeCategory::Binary => Ok(row
            .try_get::<Option<Vec<u8>>, _>(idx)?
            .map(Value::Bytes)
            .unwrap_or(Value::Null)),
        TypeCategory::Json => Ok(row
            .try_get::<Option<serde_json::Value>, _>(idx)?
            .map(Value::Json)
            .unwrap_or(Value::Null)),
        TypeCategory::Uuid => {
            let v = row.try_get::<Option<uuid::Uuid>, _>(idx)?;
            Ok(v.map(|u| u.to_string()).into())
        }
        TypeCategory::TimestampTz => {
            let v = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)?;
            Ok(v.map(|t| t.to_rfc3339()).into())
        }
        TypeCategory::Timestamp => {
            let v = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx)?;
            Ok(v.map(|t| t.to_string()).into())
        }
        TypeCategory::Date => {
            let v = row.try_get::<Option<chrono::NaiveDate>, _>(idx)?;
            Ok(v.map(|t| t.to_string()).into())
        }
        TypeCategory::Time => {
            let v = row.try_get::<Option<chrono::NaiveTime>, _>(idx)?;
            Ok(v.map(|t| t.to_string()).into())
        }
        TypeCategory::Text | TypeCategory::Unknown => decode_text(row, idx),
    }
}

fn decode_integer(row: &PgRow, idx: usize) -> DbResult<Value> {
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return Ok(v.map(i64::from).into());
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return Ok(v.map(i64::from).into());
    }
    if let Ok(v) = row.try_get::<Option<sqlx::postgres::types::Oid>, _>(idx) {
        return Ok(v.map(|oid| i64::from(oid.0)).into());
    }
    Ok(row.try_get::<Option<i64>, _>(idx)?.into())
}

fn decode_float(row: &PgRow, idx: usize) -> DbResult<Value> {
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return Ok(v.map(f64::from).into());
    }
    Ok(row.try_get::<Option<f64>, _>(idx)?.into())
}

/// Column value in the server's own text rendering. Used for character types
/// and for types without a dedicated decoder (intervals, reg* types, network
/// types, arrays).
fn decode_text(row: &PgRow, idx: usize) -> DbResult<Value> {
    row.try_get::<Option<ServerText>, _>(idx)
        .map(|v| Value::from(v.map(|t| t.0)))
        .map_err(|e| DbError::decode(row.column(idx).name(), e.to_string()))
}

/// Accepts any column type as long as the value arrived in text format.
#[derive(Debug)]
struct ServerText(String);

impl Type<sqlx::Postgres> for ServerText {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("text")
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for ServerText {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(ServerText(value.as_str()?.to_string())),
            PgValueFormat::Binary => Err("value has no text rendering".into()),
        }
    }
}
