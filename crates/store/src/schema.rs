use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use tracehouse_core::config::Config;
use tracehouse_core::error::{Result, TracehouseError};
use tracehouse_core::table::TableName;

use crate::db::Backend;

// `{table}` and `{ttl}` are substituted here; `{cluster}` is a ClickHouse
// macro and passes through untouched.

const INDEX_DDL: &str = "\
CREATE TABLE IF NOT EXISTS {table} (
    timestamp DateTime64(6) CODEC(Delta, ZSTD(1)),
    traceID String CODEC(ZSTD(1)),
    service LowCardinality(String) CODEC(ZSTD(1)),
    operation LowCardinality(String) CODEC(ZSTD(1)),
    durationUs UInt64 CODEC(ZSTD(1)),
    tags Nested(
        key LowCardinality(String),
        value String
    ) CODEC(ZSTD(1))
) ENGINE MergeTree()
{ttl}
PARTITION BY toDate(timestamp)
ORDER BY (service, -toUnixTimestamp(timestamp))
SETTINGS index_granularity = 1024";

const SPANS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS {table} (
    timestamp DateTime64(6) CODEC(Delta, ZSTD(1)),
    traceID String CODEC(ZSTD(1)),
    model String CODEC(ZSTD(3))
) ENGINE MergeTree()
{ttl}
PARTITION BY toDate(timestamp)
ORDER BY traceID
SETTINGS index_granularity = 1024";

const OPERATIONS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS {table} (
    date Date CODEC(ZSTD(1)),
    service LowCardinality(String) CODEC(ZSTD(1)),
    operation LowCardinality(String) CODEC(ZSTD(1)),
    spankind LowCardinality(String) CODEC(ZSTD(1))
) ENGINE ReplacingMergeTree
{ttl}
PARTITION BY toYYYYMM(date)
ORDER BY (date, service, operation, spankind)
SETTINGS index_granularity = 32";

const REPLICATED_INDEX_DDL: &str = "\
CREATE TABLE IF NOT EXISTS {table} ON CLUSTER '{cluster}' (
    timestamp DateTime64(6) CODEC(Delta, ZSTD(1)),
    traceID String CODEC(ZSTD(1)),
    service LowCardinality(String) CODEC(ZSTD(1)),
    operation LowCardinality(String) CODEC(ZSTD(1)),
    durationUs UInt64 CODEC(ZSTD(1)),
    tags Nested(
        key LowCardinality(String),
        value String
    ) CODEC(ZSTD(1))
) ENGINE ReplicatedMergeTree
{ttl}
PARTITION BY toDate(timestamp)
ORDER BY (service, -toUnixTimestamp(timestamp))
SETTINGS index_granularity = 1024";

const REPLICATED_SPANS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS {table} ON CLUSTER '{cluster}' (
    timestamp DateTime64(6) CODEC(Delta, ZSTD(1)),
    traceID String CODEC(ZSTD(1)),
    model String CODEC(ZSTD(3))
) ENGINE ReplicatedMergeTree
{ttl}
PARTITION BY toDate(timestamp)
ORDER BY traceID
SETTINGS index_granularity = 1024";

const REPLICATED_OPERATIONS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS {table} ON CLUSTER '{cluster}' (
    date Date CODEC(ZSTD(1)),
    service LowCardinality(String) CODEC(ZSTD(1)),
    operation LowCardinality(String) CODEC(ZSTD(1)),
    spankind LowCardinality(String) CODEC(ZSTD(1))
) ENGINE ReplicatedReplacingMergeTree
{ttl}
PARTITION BY toYYYYMM(date)
ORDER BY (date, service, operation, spankind)
SETTINGS index_granularity = 32";

const DISTRIBUTED_DDL: &str = "\
CREATE TABLE IF NOT EXISTS {table} ON CLUSTER '{cluster}' AS {qualified_local}
ENGINE = Distributed('{cluster}', '{database}', {local}, cityHash64(traceID))";

/// Runs the schema statements one by one; the first failure aborts startup.
/// Every statement is `IF NOT EXISTS`, so a retry after a partial install is
/// safe.
pub async fn install(backend: &dyn Backend, cfg: &Config) -> Result<()> {
    for sql in statements(cfg)? {
        debug!(statement = %sql, "running schema statement");
        backend.execute(&sql).await?;
    }
    Ok(())
}

/// The DDL set for this configuration: four statements single-node, seven
/// replicated (four replicated locals plus Distributed tables for the spans,
/// index and archive tables). An `init_sql_scripts_dir` overrides the
/// embedded set with on-disk `*.sql` files in lexicographic order.
pub fn statements(cfg: &Config) -> Result<Vec<String>> {
    if let Some(dir) = &cfg.init_sql_scripts_dir {
        return scripts_from_dir(dir);
    }

    let ttl_timestamp = ttl_clause(cfg.ttl_days, "timestamp");
    let ttl_date = ttl_clause(cfg.ttl_days, "date");
    let archive_table = cfg.spans_table.archive();

    if cfg.replication {
        let mut out = vec![
            render(
                REPLICATED_INDEX_DDL,
                &cfg.spans_index_table.to_local(),
                &ttl_timestamp,
            ),
            render(
                REPLICATED_SPANS_DDL,
                &cfg.spans_table.to_local(),
                &ttl_timestamp,
            ),
            render(
                REPLICATED_OPERATIONS_DDL,
                &cfg.operations_table.to_local(),
                &ttl_date,
            ),
            render(
                REPLICATED_SPANS_DDL,
                &archive_table.to_local(),
                &ttl_timestamp,
            ),
        ];
        for table in [&cfg.spans_table, &cfg.spans_index_table, &archive_table] {
            out.push(distributed(table, &cfg.database));
        }
        Ok(out)
    } else {
        Ok(vec![
            render(INDEX_DDL, &cfg.spans_index_table, &ttl_timestamp),
            render(SPANS_DDL, &cfg.spans_table, &ttl_timestamp),
            render(OPERATIONS_DDL, &cfg.operations_table, &ttl_date),
            render(SPANS_DDL, &archive_table, &ttl_timestamp),
        ])
    }
}

fn render(template: &str, table: &TableName, ttl: &str) -> String {
    template
        .replace("{table}", table.as_str())
        .replace("{ttl}", ttl)
        .replace("\n\n", "\n")
}

fn distributed(table: &TableName, database: &str) -> String {
    let local = table.to_local();
    DISTRIBUTED_DDL
        .replace("{table}", table.as_str())
        .replace("{qualified_local}", local.add_db(database).as_str())
        .replace("{database}", database)
        .replace("{local}", local.as_str())
}

fn ttl_clause(days: u32, column: &str) -> String {
    if days == 0 {
        String::new()
    } else {
        format!("TTL {column} + INTERVAL {days} DAY DELETE")
    }
}

fn scripts_from_dir(dir: &Path) -> Result<Vec<String>> {
    let pattern = format!("{}/**/*.sql", dir.display());
    let mut paths: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| TracehouseError::Config(format!("bad init scripts pattern: {e}")))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| TracehouseError::Io(format!("could not list sql files: {e}")))?;
    paths.sort();

    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        let sql = fs::read_to_string(&path)
            .map_err(|e| TracehouseError::Io(format!("could not read {}: {e}", path.display())))?;
        out.push(sql);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::MockBackend;

    fn config() -> Config {
        let mut cfg = Config::default();
        cfg.set_defaults();
        cfg
    }

    #[test]
    fn single_node_schema_has_four_statements() {
        let stmts = statements(&config()).unwrap();
        assert_eq!(stmts.len(), 4);
        assert!(stmts[0].contains("CREATE TABLE IF NOT EXISTS jaeger_index_local"));
        assert!(stmts[1].contains("CREATE TABLE IF NOT EXISTS jaeger_spans_local"));
        assert!(stmts[2].contains("CREATE TABLE IF NOT EXISTS jaeger_operations_local"));
        assert!(stmts[3].contains("CREATE TABLE IF NOT EXISTS jaeger_spans_archive_local"));
        assert!(stmts.iter().all(|s| !s.contains("TTL")));
        assert!(stmts.iter().all(|s| !s.contains("{table}")));
        assert!(stmts.iter().all(|s| !s.contains("{ttl}")));
    }

    #[test]
    fn replicated_schema_has_seven_statements() {
        let mut cfg = Config {
            replication: true,
            ..Config::default()
        };
        cfg.set_defaults();
        let stmts = statements(&cfg).unwrap();
        assert_eq!(stmts.len(), 7);
        assert!(stmts[0].contains("jaeger_index_local"));
        assert!(stmts[0].contains("ReplicatedMergeTree"));
        assert!(stmts[2].contains("ReplicatedReplacingMergeTree"));

        let spans_distributed = &stmts[4];
        assert!(spans_distributed.contains("CREATE TABLE IF NOT EXISTS jaeger_spans ON CLUSTER"));
        assert!(spans_distributed.contains("AS default.jaeger_spans_local"));
        assert!(spans_distributed.contains(
            "Distributed('{cluster}', 'default', jaeger_spans_local, cityHash64(traceID))"
        ));
        assert!(stmts[5].contains("jaeger_index"));
        assert!(stmts[6].contains("jaeger_spans_archive"));
    }

    #[test]
    fn ttl_renders_on_timestamp_and_date_columns() {
        let mut cfg = config();
        cfg.ttl_days = 14;
        let stmts = statements(&cfg).unwrap();
        assert!(stmts[0].contains("TTL timestamp + INTERVAL 14 DAY DELETE"));
        assert!(stmts[1].contains("TTL timestamp + INTERVAL 14 DAY DELETE"));
        assert!(stmts[2].contains("TTL date + INTERVAL 14 DAY DELETE"));
        assert!(stmts[3].contains("TTL timestamp + INTERVAL 14 DAY DELETE"));
    }

    #[test]
    fn scripts_dir_overrides_the_embedded_schema() {
        let dir = std::env::temp_dir().join(format!(
            "tracehouse-schema-test-{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("0002-second.sql"), "CREATE TABLE second").unwrap();
        fs::write(dir.join("0001-first.sql"), "CREATE TABLE first").unwrap();
        fs::write(dir.join("ignored.txt"), "not sql").unwrap();

        let cfg = Config {
            init_sql_scripts_dir: Some(dir.clone()),
            ..config()
        };
        let stmts = statements(&cfg).unwrap();
        assert_eq!(stmts, vec!["CREATE TABLE first", "CREATE TABLE second"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn install_runs_every_statement_in_order() {
        let backend = Arc::new(MockBackend::new());
        let cfg = config();
        install(backend.as_ref(), &cfg).await.unwrap();

        let executed = backend.executed();
        assert_eq!(executed.len(), 4);
        assert!(executed[0].contains("jaeger_index_local"));
        assert!(executed[3].contains("jaeger_spans_archive_local"));
    }

    #[tokio::test]
    async fn install_aborts_on_the_first_failure() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_next_execute();
        let cfg = config();

        let err = install(backend.as_ref(), &cfg).await.unwrap_err();
        assert!(matches!(err, TracehouseError::Backend(_)));
        assert_eq!(backend.executed().len(), 1);
    }
}
