use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use tracehouse_core::config::Encoding;
use tracehouse_core::error::{Result, TracehouseError};
use tracehouse_core::ids::TraceId;
use tracehouse_core::model::span::Span;
use tracehouse_core::model::trace::Trace;
use tracehouse_core::query::{Operation, TraceQuery};
use tracehouse_core::table::TableName;

use crate::codec;
use crate::db::{Backend, SqlArg};

/// Upper bound on index scans per search.
const MAX_PROGRESSIVE_STEPS: usize = 8;

fn min_progressive_window() -> Duration {
    Duration::hours(1)
}

/// Answers service, operation and trace queries against the index and span
/// tables.
///
/// Trace searches walk the time window right to left in exponentially
/// widening slices, so selective queries finish after one scan while broad
/// ones are bounded by [`MAX_PROGRESSIVE_STEPS`]. Dropping the returned
/// future cancels the in-flight scan.
pub struct TraceReader {
    backend: Arc<dyn Backend>,
    operations_table: TableName,
    index_table: TableName,
    spans_table: TableName,
    encoding: Encoding,
}

impl TraceReader {
    pub fn new(
        backend: Arc<dyn Backend>,
        operations_table: TableName,
        index_table: TableName,
        spans_table: TableName,
        encoding: Encoding,
    ) -> Self {
        Self {
            backend,
            operations_table,
            index_table,
            spans_table,
            encoding,
        }
    }

    pub async fn get_services(&self) -> Result<Vec<String>> {
        if self.operations_table.is_empty() {
            return Err(TracehouseError::NoOperationsTable);
        }
        let sql = format!(
            "SELECT service FROM {} GROUP BY service",
            self.operations_table
        );
        self.backend.select_strings(&sql, &[]).await
    }

    pub async fn get_operations(&self, service: &str) -> Result<Vec<Operation>> {
        if self.operations_table.is_empty() {
            return Err(TracehouseError::NoOperationsTable);
        }
        let sql = format!(
            "SELECT operation, spankind FROM {} WHERE service = ? GROUP BY operation, spankind ORDER BY operation",
            self.operations_table
        );
        let rows = self
            .backend
            .select_operations(&sql, &[SqlArg::Str(service.to_string())])
            .await?;
        Ok(rows
            .into_iter()
            .map(|(name, span_kind)| Operation { name, span_kind })
            .collect())
    }

    pub async fn get_trace(&self, trace_id: TraceId) -> Result<Trace> {
        let traces = self.get_traces(&[trace_id]).await?;
        traces
            .into_iter()
            .next()
            .ok_or(TracehouseError::TraceNotFound)
    }

    pub async fn find_traces(&self, query: &TraceQuery) -> Result<Vec<Trace>> {
        let trace_ids = self.find_trace_ids(query).await?;
        self.get_traces(&trace_ids).await
    }

    pub async fn find_trace_ids(&self, query: &TraceQuery) -> Result<Vec<TraceId>> {
        let start = query
            .start_time_min
            .ok_or(TracehouseError::StartTimeRequired)?;
        let end = query.start_time_max.unwrap_or_else(Utc::now);
        if end < start {
            return Ok(Vec::new());
        }

        let full = end - start;
        if full <= min_progressive_window() {
            return self.find_trace_ids_in_range(query, start, end, &[]).await;
        }

        let mut width = full / (1 << (MAX_PROGRESSIVE_STEPS - 1));
        if width < min_progressive_window() {
            width = min_progressive_window();
        }

        let mut found: Vec<TraceId> = Vec::new();
        let mut slice_end = end;
        for step in 0..MAX_PROGRESSIVE_STEPS {
            if found.len() >= query.num_traces {
                break;
            }
            // The last slice always covers the residual window.
            if step == MAX_PROGRESSIVE_STEPS - 1 {
                width = full;
            }
            let mut slice_start = slice_end - width;
            if slice_start < start {
                slice_start = start;
            }
            let batch = self
                .find_trace_ids_in_range(query, slice_start, slice_end, &found)
                .await?;
            found.extend(batch);
            slice_end = slice_start;
            width = width * 2;
        }
        Ok(found)
    }

    /// One narrowing scan over `[start, end]`, excluding IDs already found.
    /// Clause order and argument order match exactly.
    async fn find_trace_ids_in_range(
        &self,
        query: &TraceQuery,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        skip: &[TraceId],
    ) -> Result<Vec<TraceId>> {
        if end < start {
            return Ok(Vec::new());
        }
        if self.index_table.is_empty() {
            return Err(TracehouseError::NoIndexTable);
        }

        let mut sql = format!(
            "SELECT DISTINCT traceID FROM {} WHERE service = ? AND timestamp >= ? AND timestamp <= ?",
            self.index_table
        );
        let mut args = vec![
            SqlArg::Str(query.service.clone()),
            SqlArg::Ts(start),
            SqlArg::Ts(end),
        ];

        if let Some(operation) = &query.operation {
            sql.push_str(" AND operation = ?");
            args.push(SqlArg::Str(operation.clone()));
        }
        if let Some(min) = query.duration_min {
            sql.push_str(" AND durationUs >= ?");
            args.push(SqlArg::U64(min.as_micros() as u64));
        }
        if let Some(max) = query.duration_max {
            sql.push_str(" AND durationUs <= ?");
            args.push(SqlArg::U64(max.as_micros() as u64));
        }
        for (key, value) in &query.tags {
            sql.push_str(" AND has(tags.key, ?) AND tags.value[indexOf(tags.key, ?)] == ?");
            args.push(SqlArg::Str(key.clone()));
            args.push(SqlArg::Str(key.clone()));
            args.push(SqlArg::Str(value.clone()));
        }
        if !skip.is_empty() {
            let placeholders = vec!["?"; skip.len()].join(",");
            sql.push_str(&format!(" AND traceID NOT IN ({placeholders})"));
            for id in skip {
                args.push(SqlArg::Str(id.to_string()));
            }
        }
        sql.push_str(" ORDER BY service, timestamp DESC LIMIT ?");
        args.push(SqlArg::U64(
            query.num_traces.saturating_sub(skip.len()) as u64
        ));

        let rows = self.backend.select_strings(&sql, &args).await?;
        rows.iter().map(|raw| raw.parse::<TraceId>()).collect()
    }

    /// Fetches the payloads for a set of trace IDs in one scan and groups
    /// them, one trace per ID, in order of first appearance.
    async fn get_traces(&self, trace_ids: &[TraceId]) -> Result<Vec<Trace>> {
        if trace_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; trace_ids.len()].join(",");
        let sql = format!(
            "SELECT model FROM {} PREWHERE traceID IN ({placeholders})",
            self.spans_table
        );
        let args: Vec<SqlArg> = trace_ids
            .iter()
            .map(|id| SqlArg::Str(id.to_string()))
            .collect();
        let payloads = self.backend.select_models(&sql, &args).await?;

        let mut order: Vec<TraceId> = Vec::new();
        let mut grouped: HashMap<TraceId, Vec<Span>> = HashMap::new();
        for payload in payloads {
            let span = codec::decode(self.encoding, &payload)?;
            grouped
                .entry(span.trace_id)
                .or_insert_with(|| {
                    order.push(span.trace_id);
                    Vec::new()
                })
                .push(span);
        }
        Ok(order
            .into_iter()
            .map(|trace_id| Trace {
                spans: grouped.remove(&trace_id).unwrap_or_default(),
                trace_id,
            })
            .collect())
    }
}
