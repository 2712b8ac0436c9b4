use std::cmp::Ordering;
use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SpanId, TraceId};

/// A single timed operation within a trace.
///
/// Tags, logs and references are preserved verbatim by the codec; only the
/// named fields are projected into the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub operation_name: String,
    pub service_name: String,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    #[serde(default)]
    pub span_kind: String,
    #[serde(default)]
    pub tags: Vec<KeyValue>,
    #[serde(default)]
    pub logs: Vec<SpanLog>,
    #[serde(default)]
    pub references: Vec<SpanRef>,
}

impl Span {
    /// Span duration in whole microseconds, rounded, floored at one.
    pub fn duration_us(&self) -> u64 {
        let micros = (self.duration.as_nanos() + 500) / 1000;
        (micros as u64).max(1)
    }

    /// Canonicalizes tag order by key, then value type, then value bytes.
    /// Codec round-trips are exact on normalized spans.
    pub fn normalized(mut self) -> Self {
        self.tags.sort_by(KeyValue::canonical_cmp);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: TagValue,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: TagValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    fn canonical_cmp(a: &KeyValue, b: &KeyValue) -> Ordering {
        a.key
            .cmp(&b.key)
            .then(a.value.type_tag().cmp(&b.value.type_tag()))
            .then_with(|| a.value.as_string().cmp(&b.value.as_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagValue {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
}

impl TagValue {
    /// The index-column rendering: strings verbatim, bools `true`/`false`,
    /// numbers in plain decimal, bytes as lowercase hex.
    pub fn as_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bytes(bytes) => {
                let mut out = String::with_capacity(bytes.len() * 2);
                for byte in bytes {
                    let _ = write!(out, "{byte:02x}");
                }
                out
            }
        }
    }

    fn type_tag(&self) -> u8 {
        match self {
            Self::String(_) => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
            Self::Bytes(_) => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLog {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub fields: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRef {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub ref_type: RefType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    ChildOf,
    FollowsFrom,
}
