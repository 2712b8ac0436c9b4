use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TracehouseError {
    #[error("trace not found")]
    TraceNotFound,

    #[error("no index table configured")]
    NoIndexTable,

    #[error("no operations table configured")]
    NoOperationsTable,

    #[error("query start time is required")]
    StartTimeRequired,

    #[error("span buffer is full")]
    Overloaded,

    #[error("writer is closed")]
    Closed,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, TracehouseError>;
