use std::sync::Arc;

use tracehouse_core::config::Config;
use tracehouse_core::error::Result;
use tracehouse_core::table::TableName;

use crate::db::{Backend, ClickHouseBackend};
use crate::dependency::DependencyReader;
use crate::query::TraceReader;
use crate::schema;
use crate::write::{SpanWriter, WriterConfig};

/// The storage surface handed to the plugin host: a primary writer/reader
/// pair over the indexed tables and an archive pair over the archive span
/// table alone.
pub struct Store {
    writer: Arc<SpanWriter>,
    archive_writer: Arc<SpanWriter>,
    reader: Arc<TraceReader>,
    archive_reader: Arc<TraceReader>,
}

impl Store {
    /// Connects to the backend and installs the schema before wiring the
    /// reader/writer pairs. Errors here are fatal to startup.
    pub async fn connect(mut config: Config) -> Result<Self> {
        config.set_defaults();
        let backend = Arc::new(ClickHouseBackend::connect(&config)?);
        schema::install(backend.as_ref(), &config).await?;
        Ok(Self::with_backend(backend, config))
    }

    /// Wires the pairs over an already-established backend.
    pub fn with_backend(backend: Arc<dyn Backend>, config: Config) -> Self {
        let writer = Arc::new(SpanWriter::new(
            Arc::clone(&backend),
            WriterConfig::from_config(&config),
        ));
        let archive_writer = Arc::new(SpanWriter::new(
            Arc::clone(&backend),
            WriterConfig::archive_from_config(&config),
        ));
        let reader = Arc::new(TraceReader::new(
            Arc::clone(&backend),
            config.operations_target(),
            config.spans_index_table.clone(),
            config.spans_table.clone(),
            config.encoding,
        ));
        let archive_reader = Arc::new(TraceReader::new(
            backend,
            TableName::none(),
            TableName::none(),
            config.spans_table.archive(),
            config.encoding,
        ));

        Self {
            writer,
            archive_writer,
            reader,
            archive_reader,
        }
    }

    pub fn span_reader(&self) -> Arc<TraceReader> {
        Arc::clone(&self.reader)
    }

    pub fn span_writer(&self) -> Arc<SpanWriter> {
        Arc::clone(&self.writer)
    }

    pub fn archive_span_reader(&self) -> Arc<TraceReader> {
        Arc::clone(&self.archive_reader)
    }

    pub fn archive_span_writer(&self) -> Arc<SpanWriter> {
        Arc::clone(&self.archive_writer)
    }

    pub fn dependency_reader(&self) -> DependencyReader {
        DependencyReader::new()
    }

    /// Flushes and shuts down both writers. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.writer.close().await?;
        self.archive_writer.close().await
    }
}
