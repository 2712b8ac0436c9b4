use std::fmt;

use serde::{Deserialize, Serialize};

const LOCAL_SUFFIX: &str = "_local";
const ARCHIVE_SUFFIX: &str = "_archive";

/// A table reference: a bare name, optionally qualified with a database.
///
/// The empty name means "target disabled" and is how the archive pair turns
/// off its index and operations writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn none() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The single-shard variant of this table, suffixed `_local`.
    pub fn to_local(&self) -> TableName {
        if self.0.ends_with(LOCAL_SUFFIX) {
            self.clone()
        } else {
            Self(format!("{}{LOCAL_SUFFIX}", self.0))
        }
    }

    /// Qualifies the name with a database unless one is already present.
    pub fn add_db(&self, database: &str) -> TableName {
        if self.0.contains('.') {
            self.clone()
        } else {
            Self(format!("{database}.{}", self.0))
        }
    }

    /// The archive counterpart: `_archive` goes before any `_local` suffix.
    pub fn archive(&self) -> TableName {
        let (base, local) = match self.0.strip_suffix(LOCAL_SUFFIX) {
            Some(base) => (base, LOCAL_SUFFIX),
            None => (self.0.as_str(), ""),
        };
        if base.ends_with(ARCHIVE_SUFFIX) {
            self.clone()
        } else {
            Self(format!("{base}{ARCHIVE_SUFFIX}{local}"))
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}
