use std::time::Duration;

use chrono::{DateTime, Utc};

use tracehouse_core::error::Result;
use tracehouse_core::model::trace::DependencyLink;

/// Dependency graph reads are not computed by this backend; the graph is
/// always empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyReader;

impl DependencyReader {
    pub fn new() -> Self {
        Self
    }

    pub async fn get_dependencies(
        &self,
        _end_time: DateTime<Utc>,
        _lookback: Duration,
    ) -> Result<Vec<DependencyLink>> {
        Ok(Vec::new())
    }
}
