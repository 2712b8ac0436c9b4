use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parameters for a trace search against the index table.
///
/// `service` and `start_time_min` are mandatory; everything else narrows the
/// scan. `start_time_max` defaults to now when unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceQuery {
    pub service: String,
    pub operation: Option<String>,
    pub tags: HashMap<String, String>,
    pub start_time_min: Option<DateTime<Utc>>,
    pub start_time_max: Option<DateTime<Utc>>,
    pub duration_min: Option<Duration>,
    pub duration_max: Option<Duration>,
    pub num_traces: usize,
}

impl Default for TraceQuery {
    fn default() -> Self {
        Self {
            service: String::new(),
            operation: None,
            tags: HashMap::new(),
            start_time_min: None,
            start_time_max: None,
            duration_min: None,
            duration_max: None,
            num_traces: 100,
        }
    }
}

/// One (operation, span kind) pair from the operations table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    pub span_kind: String,
}
