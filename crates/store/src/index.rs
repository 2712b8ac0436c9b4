use tracehouse_core::model::span::Span;

use crate::db::{IndexRow, OperationRow};

/// Keys that never get their own index row; `span.kind` already rides along
/// in the operations row.
const RESERVED_TAG_KEYS: &[&str] = &["span.kind"];

/// Expands a span into its index rows: one wildcard row with empty tag
/// arrays, then one row per non-reserved tag for equality lookups.
pub fn index_rows(span: &Span) -> Vec<IndexRow> {
    let mut rows = Vec::with_capacity(span.tags.len() + 1);
    rows.push(index_row(span, Vec::new(), Vec::new()));
    for tag in &span.tags {
        if RESERVED_TAG_KEYS.contains(&tag.key.as_str()) {
            continue;
        }
        rows.push(index_row(
            span,
            vec![tag.key.clone()],
            vec![tag.value.as_string()],
        ));
    }
    rows
}

fn index_row(span: &Span, tag_keys: Vec<String>, tag_values: Vec<String>) -> IndexRow {
    IndexRow {
        timestamp: span.start_time,
        trace_id: span.trace_id.to_string(),
        service: span.service_name.clone(),
        operation: span.operation_name.clone(),
        duration_us: span.duration_us(),
        tag_keys,
        tag_values,
    }
}

pub fn operation_row(span: &Span) -> OperationRow {
    OperationRow {
        date: span.start_time.date_naive(),
        service: span.service_name.clone(),
        operation: span.operation_name.clone(),
        spankind: span.span_kind.clone(),
    }
}
