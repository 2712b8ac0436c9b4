use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TracehouseError};
use crate::table::TableName;

pub const DEFAULT_MAX_SPAN_COUNT: usize = 10_000_000;
pub const DEFAULT_BATCH_WRITE_SIZE: usize = 10_000;
pub const DEFAULT_BATCH_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

const DEFAULT_SPANS_TABLE: &str = "jaeger_spans";
const DEFAULT_INDEX_TABLE: &str = "jaeger_index";
const DEFAULT_OPERATIONS_TABLE: &str = "jaeger_operations";

/// Payload encoding for the span table `model` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Self-describing JSON, forward-compatible across model changes.
    #[default]
    Json,
    /// Compact schema-bound binary.
    Binary,
}

impl Encoding {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "json" | "text" => Ok(Self::Json),
            "binary" => Ok(Self::Binary),
            other => Err(TracehouseError::Config(format!(
                "unknown encoding: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub address: String,
    pub database: String,
    pub username: String,
    pub password: String,
    /// PEM bundle; presence enables TLS towards the backend.
    pub ca_file: Option<PathBuf>,
    /// Overrides the embedded schema with on-disk `*.sql` scripts.
    pub init_sql_scripts_dir: Option<PathBuf>,
    pub max_span_count: usize,
    pub batch_write_size: usize,
    pub batch_flush_interval: Duration,
    pub encoding: Encoding,
    pub replication: bool,
    pub spans_table: TableName,
    pub spans_index_table: TableName,
    pub operations_table: TableName,
    /// Days of retention on all tables; 0 disables the TTL clause.
    pub ttl_days: u32,
    pub metrics_endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: String::new(),
            database: "default".to_string(),
            username: "default".to_string(),
            password: String::new(),
            ca_file: None,
            init_sql_scripts_dir: None,
            max_span_count: DEFAULT_MAX_SPAN_COUNT,
            batch_write_size: DEFAULT_BATCH_WRITE_SIZE,
            batch_flush_interval: DEFAULT_BATCH_FLUSH_INTERVAL,
            encoding: Encoding::Json,
            replication: false,
            spans_table: TableName::none(),
            spans_index_table: TableName::none(),
            operations_table: TableName::none(),
            ttl_days: 0,
            metrics_endpoint: "localhost:9090".to_string(),
        }
    }
}

impl Config {
    /// Fills in the table names left empty by the caller. Non-replicated
    /// deployments write the `_local` tables directly; replicated ones target
    /// the distributed names.
    pub fn set_defaults(&mut self) {
        if self.spans_table.is_empty() {
            self.spans_table = default_table(DEFAULT_SPANS_TABLE, self.replication);
        }
        if self.spans_index_table.is_empty() {
            self.spans_index_table = default_table(DEFAULT_INDEX_TABLE, self.replication);
        }
        if self.operations_table.is_empty() {
            self.operations_table = default_table(DEFAULT_OPERATIONS_TABLE, self.replication);
        }
    }

    /// The operations table the writer and reader address. Replicated
    /// deployments have no distributed wrapper for it and write the
    /// replicated local table directly.
    pub fn operations_target(&self) -> TableName {
        if self.replication {
            self.operations_table.to_local()
        } else {
            self.operations_table.clone()
        }
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("TRACEHOUSE_ADDRESS") {
            cfg.address = v;
        }
        if let Ok(v) = env::var("TRACEHOUSE_DATABASE") {
            cfg.database = v;
        }
        if let Ok(v) = env::var("TRACEHOUSE_USERNAME") {
            cfg.username = v;
        }
        if let Ok(v) = env::var("TRACEHOUSE_PASSWORD") {
            cfg.password = v;
        }
        if let Ok(v) = env::var("TRACEHOUSE_CA_FILE") {
            cfg.ca_file = Some(PathBuf::from(v));
        }
        if let Ok(v) = env::var("TRACEHOUSE_INIT_SQL_SCRIPTS_DIR") {
            cfg.init_sql_scripts_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = env::var("TRACEHOUSE_MAX_SPAN_COUNT") {
            cfg.max_span_count = v
                .parse::<usize>()
                .map_err(|e| TracehouseError::Config(format!("bad TRACEHOUSE_MAX_SPAN_COUNT: {e}")))?;
        }
        if let Ok(v) = env::var("TRACEHOUSE_BATCH_WRITE_SIZE") {
            cfg.batch_write_size = v.parse::<usize>().map_err(|e| {
                TracehouseError::Config(format!("bad TRACEHOUSE_BATCH_WRITE_SIZE: {e}"))
            })?;
        }
        if let Ok(v) = env::var("TRACEHOUSE_BATCH_FLUSH_INTERVAL") {
            cfg.batch_flush_interval = humantime::parse_duration(&v).map_err(|e| {
                TracehouseError::Config(format!("bad TRACEHOUSE_BATCH_FLUSH_INTERVAL: {e}"))
            })?;
        }
        if let Ok(v) = env::var("TRACEHOUSE_ENCODING") {
            cfg.encoding = Encoding::parse(&v)?;
        }
        if let Ok(v) = env::var("TRACEHOUSE_REPLICATION") {
            cfg.replication = parse_bool(&v);
        }
        if let Ok(v) = env::var("TRACEHOUSE_SPANS_TABLE") {
            cfg.spans_table = TableName::new(v);
        }
        if let Ok(v) = env::var("TRACEHOUSE_SPANS_INDEX_TABLE") {
            cfg.spans_index_table = TableName::new(v);
        }
        if let Ok(v) = env::var("TRACEHOUSE_OPERATIONS_TABLE") {
            cfg.operations_table = TableName::new(v);
        }
        if let Ok(v) = env::var("TRACEHOUSE_TTL_DAYS") {
            cfg.ttl_days = v
                .parse::<u32>()
                .map_err(|e| TracehouseError::Config(format!("bad TRACEHOUSE_TTL_DAYS: {e}")))?;
        }
        if let Ok(v) = env::var("TRACEHOUSE_METRICS_ENDPOINT") {
            cfg.metrics_endpoint = v;
        }

        Ok(cfg)
    }
}

fn default_table(name: &str, replication: bool) -> TableName {
    let table = TableName::new(name);
    if replication { table } else { table.to_local() }
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
