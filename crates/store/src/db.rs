use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracehouse_core::config::Config;
use tracehouse_core::error::{Result, TracehouseError};
use tracehouse_core::table::TableName;

/// A value bound to a `?` placeholder, in clause order.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    Str(String),
    U64(u64),
    Ts(DateTime<Utc>),
}

/// One row of the span table: the opaque encoded payload keyed by trace ID.
#[derive(Debug, Clone, PartialEq, clickhouse::Row, Serialize, Deserialize)]
pub struct SpanRow {
    #[serde(with = "clickhouse::serde::chrono::datetime64::micros")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "traceID")]
    pub trace_id: String,
    pub model: Vec<u8>,
}

/// One row of the index table. The wildcard row carries empty tag arrays;
/// per-tag rows carry exactly one key/value pair.
#[derive(Debug, Clone, PartialEq, clickhouse::Row, Serialize, Deserialize)]
pub struct IndexRow {
    #[serde(with = "clickhouse::serde::chrono::datetime64::micros")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "traceID")]
    pub trace_id: String,
    pub service: String,
    pub operation: String,
    #[serde(rename = "durationUs")]
    pub duration_us: u64,
    #[serde(rename = "tags.key")]
    pub tag_keys: Vec<String>,
    #[serde(rename = "tags.value")]
    pub tag_values: Vec<String>,
}

/// One row of the operations table; the replacing merge engine collapses
/// duplicates server-side.
#[derive(Debug, Clone, PartialEq, clickhouse::Row, Serialize, Deserialize)]
pub struct OperationRow {
    #[serde(with = "clickhouse::serde::chrono::date")]
    pub date: NaiveDate,
    pub service: String,
    pub operation: String,
    pub spankind: String,
}

/// The interface to the columnar store. Production uses [`ClickHouseBackend`];
/// tests substitute a scripted double.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<()>;

    async fn select_strings(&self, sql: &str, args: &[SqlArg]) -> Result<Vec<String>>;

    async fn select_operations(&self, sql: &str, args: &[SqlArg])
    -> Result<Vec<(String, String)>>;

    async fn select_models(&self, sql: &str, args: &[SqlArg]) -> Result<Vec<Vec<u8>>>;

    async fn insert_spans(&self, table: &TableName, rows: &[SpanRow]) -> Result<()>;

    async fn insert_index(&self, table: &TableName, rows: &[IndexRow]) -> Result<()>;

    async fn insert_operations(&self, table: &TableName, rows: &[OperationRow]) -> Result<()>;
}

pub struct ClickHouseBackend {
    client: clickhouse::Client,
}

impl ClickHouseBackend {
    /// Builds a client from the configured endpoint. A `ca_file` switches the
    /// connection to TLS; no process-global TLS registry is involved.
    pub fn connect(cfg: &Config) -> Result<Self> {
        if cfg.address.is_empty() {
            return Err(TracehouseError::Config(
                "backend address is required".to_string(),
            ));
        }
        let url = if cfg.address.contains("://") {
            cfg.address.clone()
        } else if cfg.ca_file.is_some() {
            format!("https://{}", cfg.address)
        } else {
            format!("http://{}", cfg.address)
        };

        let client = clickhouse::Client::default()
            .with_url(url)
            .with_database(&cfg.database)
            .with_user(&cfg.username)
            .with_password(&cfg.password);

        Ok(Self { client })
    }

    fn bind(&self, sql: &str, args: &[SqlArg]) -> clickhouse::query::Query {
        let mut query = self.client.query(sql);
        for arg in args {
            query = match arg {
                SqlArg::Str(v) => query.bind(v.as_str()),
                SqlArg::U64(v) => query.bind(*v),
                SqlArg::Ts(v) => query.bind(format_timestamp(v)),
            };
        }
        query
    }

    async fn write_all<T: clickhouse::Row + Serialize>(
        &self,
        table: &TableName,
        rows: &[T],
    ) -> Result<()> {
        let mut insert = self
            .client
            .insert::<T>(table.as_str())
            .map_err(|e| backend_error("prepare insert", table, e))?;
        for row in rows {
            insert
                .write(row)
                .await
                .map_err(|e| backend_error("write row", table, e))?;
        }
        insert
            .end()
            .await
            .map_err(|e| backend_error("finish insert", table, e))
    }
}

#[async_trait]
impl Backend for ClickHouseBackend {
    async fn execute(&self, sql: &str) -> Result<()> {
        self.client
            .query(sql)
            .execute()
            .await
            .map_err(|e| TracehouseError::Backend(format!("statement failed: {e}")))
    }

    async fn select_strings(&self, sql: &str, args: &[SqlArg]) -> Result<Vec<String>> {
        let rows = self
            .bind(sql, args)
            .fetch_all::<StringRow>()
            .await
            .map_err(|e| TracehouseError::Backend(format!("query failed: {e}")))?;
        Ok(rows.into_iter().map(|r| r.value).collect())
    }

    async fn select_operations(
        &self,
        sql: &str,
        args: &[SqlArg],
    ) -> Result<Vec<(String, String)>> {
        let rows = self
            .bind(sql, args)
            .fetch_all::<OperationNameRow>()
            .await
            .map_err(|e| TracehouseError::Backend(format!("query failed: {e}")))?;
        Ok(rows.into_iter().map(|r| (r.operation, r.spankind)).collect())
    }

    async fn select_models(&self, sql: &str, args: &[SqlArg]) -> Result<Vec<Vec<u8>>> {
        let rows = self
            .bind(sql, args)
            .fetch_all::<ModelRow>()
            .await
            .map_err(|e| TracehouseError::Backend(format!("query failed: {e}")))?;
        Ok(rows.into_iter().map(|r| r.model).collect())
    }

    async fn insert_spans(&self, table: &TableName, rows: &[SpanRow]) -> Result<()> {
        self.write_all(table, rows).await
    }

    async fn insert_index(&self, table: &TableName, rows: &[IndexRow]) -> Result<()> {
        self.write_all(table, rows).await
    }

    async fn insert_operations(&self, table: &TableName, rows: &[OperationRow]) -> Result<()> {
        self.write_all(table, rows).await
    }
}

#[derive(clickhouse::Row, Deserialize)]
struct StringRow {
    value: String,
}

#[derive(clickhouse::Row, Deserialize)]
struct OperationNameRow {
    operation: String,
    spankind: String,
}

#[derive(clickhouse::Row, Deserialize)]
struct ModelRow {
    model: Vec<u8>,
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

fn backend_error(what: &str, table: &TableName, e: clickhouse::error::Error) -> TracehouseError {
    TracehouseError::Backend(format!("{what} into {table} failed: {e}"))
}
