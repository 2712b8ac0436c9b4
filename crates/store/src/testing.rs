use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use tracehouse_core::error::{Result, TracehouseError};
use tracehouse_core::ids::{SpanId, TraceId};
use tracehouse_core::model::span::{KeyValue, Span, TagValue};
use tracehouse_core::table::TableName;

use crate::db::{Backend, IndexRow, OperationRow, SpanRow, SqlArg};

/// One recorded SELECT, with its bound arguments in clause order.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub sql: String,
    pub args: Vec<SqlArg>,
}

/// A scripted stand-in for the database: records every statement and insert,
/// and answers SELECTs from queued results (empty when the queue runs dry).
#[derive(Default)]
pub struct MockBackend {
    calls: Mutex<Vec<Call>>,
    executed: Mutex<Vec<String>>,
    string_results: Mutex<VecDeque<Result<Vec<String>>>>,
    operation_results: Mutex<VecDeque<Result<Vec<(String, String)>>>>,
    model_results: Mutex<VecDeque<Result<Vec<Vec<u8>>>>>,
    execute_results: Mutex<VecDeque<Result<()>>>,
    span_insert_results: Mutex<VecDeque<Result<()>>>,
    span_inserts: Mutex<Vec<(String, Vec<SpanRow>)>>,
    index_inserts: Mutex<Vec<(String, Vec<IndexRow>)>>,
    operation_inserts: Mutex<Vec<(String, Vec<OperationRow>)>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_strings(&self, result: Result<Vec<String>>) {
        self.string_results.lock().unwrap().push_back(result);
    }

    pub fn push_operations(&self, result: Result<Vec<(String, String)>>) {
        self.operation_results.lock().unwrap().push_back(result);
    }

    pub fn push_models(&self, result: Result<Vec<Vec<u8>>>) {
        self.model_results.lock().unwrap().push_back(result);
    }

    pub fn fail_next_execute(&self) {
        self.execute_results
            .lock()
            .unwrap()
            .push_back(Err(TracehouseError::Backend("statement refused".into())));
    }

    pub fn fail_next_span_insert(&self) {
        self.span_insert_results
            .lock()
            .unwrap()
            .push_back(Err(TracehouseError::Backend("insert refused".into())));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn span_inserts(&self) -> Vec<(String, Vec<SpanRow>)> {
        self.span_inserts.lock().unwrap().clone()
    }

    pub fn index_inserts(&self) -> Vec<(String, Vec<IndexRow>)> {
        self.index_inserts.lock().unwrap().clone()
    }

    pub fn operation_inserts(&self) -> Vec<(String, Vec<OperationRow>)> {
        self.operation_inserts.lock().unwrap().clone()
    }

    fn record(&self, sql: &str, args: &[SqlArg]) {
        self.calls.lock().unwrap().push(Call {
            sql: sql.to_string(),
            args: args.to_vec(),
        });
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn execute(&self, sql: &str) -> Result<()> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.execute_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn select_strings(&self, sql: &str, args: &[SqlArg]) -> Result<Vec<String>> {
        self.record(sql, args);
        self.string_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn select_operations(
        &self,
        sql: &str,
        args: &[SqlArg],
    ) -> Result<Vec<(String, String)>> {
        self.record(sql, args);
        self.operation_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn select_models(&self, sql: &str, args: &[SqlArg]) -> Result<Vec<Vec<u8>>> {
        self.record(sql, args);
        self.model_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn insert_spans(&self, table: &TableName, rows: &[SpanRow]) -> Result<()> {
        self.span_inserts
            .lock()
            .unwrap()
            .push((table.as_str().to_string(), rows.to_vec()));
        self.span_insert_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn insert_index(&self, table: &TableName, rows: &[IndexRow]) -> Result<()> {
        self.index_inserts
            .lock()
            .unwrap()
            .push((table.as_str().to_string(), rows.to_vec()));
        Ok(())
    }

    async fn insert_operations(&self, table: &TableName, rows: &[OperationRow]) -> Result<()> {
        self.operation_inserts
            .lock()
            .unwrap()
            .push((table.as_str().to_string(), rows.to_vec()));
        Ok(())
    }
}

/// A deterministic span fixture; `seed` varies the IDs.
pub fn sample_span(seed: u64) -> Span {
    let base = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    Span {
        trace_id: TraceId::new(0, seed),
        span_id: SpanId(seed + 1000),
        operation_name: "GET /v1/orders".to_string(),
        service_name: "api".to_string(),
        start_time: base + chrono::Duration::seconds(seed as i64),
        duration: Duration::from_micros(1500),
        span_kind: "server".to_string(),
        tags: vec![
            KeyValue::new("error", TagValue::Bool(true)),
            KeyValue::new("http.status_code", TagValue::Int(500)),
        ],
        logs: Vec::new(),
        references: Vec::new(),
    }
}
