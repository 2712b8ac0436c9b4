use serde::{Deserialize, Serialize};

use crate::ids::TraceId;
use crate::model::span::Span;

/// The set of spans sharing one trace ID, in backend scan order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: TraceId,
    pub spans: Vec<Span>,
}

/// An edge in the service dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyLink {
    pub parent: String,
    pub child: String,
    pub call_count: u64,
}
