use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::warn;

use tracehouse_core::config::{Config, Encoding};
use tracehouse_core::error::{Result, TracehouseError};
use tracehouse_core::model::span::Span;
use tracehouse_core::table::TableName;

use crate::codec;
use crate::db::{Backend, IndexRow, OperationRow, SpanRow};
use crate::index;

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub spans_table: TableName,
    pub index_table: TableName,
    pub operations_table: TableName,
    pub encoding: Encoding,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_span_count: usize,
}

impl WriterConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            spans_table: cfg.spans_table.clone(),
            index_table: cfg.spans_index_table.clone(),
            operations_table: cfg.operations_target(),
            encoding: cfg.encoding,
            batch_size: cfg.batch_write_size,
            flush_interval: cfg.batch_flush_interval,
            max_span_count: cfg.max_span_count,
        }
    }

    /// The archive writer targets the archive span table only; with no index
    /// or operations table the projector is never invoked.
    pub fn archive_from_config(cfg: &Config) -> Self {
        Self {
            spans_table: cfg.spans_table.archive(),
            index_table: TableName::none(),
            operations_table: TableName::none(),
            ..Self::from_config(cfg)
        }
    }
}

/// Accepts spans from any number of producers and coalesces them into bulk
/// inserts on a single consumer task.
///
/// A span is accepted unless the writer is closed or the global in-flight cap
/// would be exceeded. Accepted spans are released from the cap after their
/// batch flushes, whether or not the bulk insert succeeded; a failed insert
/// drops the batch with a warning rather than retrying, so backpressure and
/// memory stay bounded.
pub struct SpanWriter {
    tx: Mutex<Option<mpsc::Sender<Span>>>,
    done: watch::Receiver<bool>,
    in_flight: Arc<AtomicUsize>,
    max_span_count: usize,
}

impl SpanWriter {
    pub fn new(backend: Arc<dyn Backend>, cfg: WriterConfig) -> Self {
        let (tx, rx) = mpsc::channel(cfg.batch_size.max(1));
        let (done_tx, done_rx) = watch::channel(false);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_span_count = cfg.max_span_count;

        tokio::spawn(run_writer(backend, cfg, rx, Arc::clone(&in_flight), done_tx));

        Self {
            tx: Mutex::new(Some(tx)),
            done: done_rx,
            in_flight,
            max_span_count,
        }
    }

    /// Hands one span to the consumer. May briefly block on the bounded
    /// channel while a flush is in progress.
    pub async fn write_span(&self, span: Span) -> Result<()> {
        let tx = match &*self.tx.lock().expect("writer sender lock poisoned") {
            Some(tx) => tx.clone(),
            None => return Err(TracehouseError::Closed),
        };

        if self.in_flight.fetch_add(1, Ordering::SeqCst) >= self.max_span_count {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(TracehouseError::Overloaded);
        }

        if tx.send(span).await.is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(TracehouseError::Closed);
        }
        Ok(())
    }

    /// Spans accepted but not yet flushed (or dropped).
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Begins shutdown: rejects further spans, drains the channel, flushes
    /// the pending batch once, and returns when the consumer has exited.
    /// Idempotent, and safe to call concurrently.
    pub async fn close(&self) -> Result<()> {
        drop(self.tx.lock().expect("writer sender lock poisoned").take());
        let mut done = self.done.clone();
        // An Err here means the consumer is already gone, which is as closed
        // as it gets.
        let _ = done.wait_for(|finished| *finished).await;
        Ok(())
    }
}

#[derive(Default)]
struct PendingBatch {
    spans: Vec<SpanRow>,
    index: Vec<IndexRow>,
    operations: Vec<OperationRow>,
    span_count: usize,
}

impl PendingBatch {
    fn is_empty(&self) -> bool {
        self.span_count == 0
    }

    fn take(&mut self) -> PendingBatch {
        std::mem::take(self)
    }
}

async fn run_writer(
    backend: Arc<dyn Backend>,
    cfg: WriterConfig,
    mut rx: mpsc::Receiver<Span>,
    in_flight: Arc<AtomicUsize>,
    done: watch::Sender<bool>,
) {
    let mut ticker = tokio::time::interval(cfg.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut pending = PendingBatch::default();

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(span) => {
                    enqueue(&cfg, &mut pending, &in_flight, span);
                    if pending.span_count >= cfg.batch_size {
                        flush(backend.as_ref(), &cfg, &mut pending, &in_flight).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    flush(backend.as_ref(), &cfg, &mut pending, &in_flight).await;
                }
            }
        }
    }

    if !pending.is_empty() {
        flush(backend.as_ref(), &cfg, &mut pending, &in_flight).await;
    }
    let _ = done.send(true);
}

fn enqueue(cfg: &WriterConfig, pending: &mut PendingBatch, in_flight: &AtomicUsize, span: Span) {
    if !cfg.spans_table.is_empty() {
        match codec::encode(cfg.encoding, &span) {
            Ok(model) => pending.spans.push(SpanRow {
                timestamp: span.start_time,
                trace_id: span.trace_id.to_string(),
                model,
            }),
            Err(error) => {
                warn!(%error, trace_id = %span.trace_id, "dropping span that failed to encode");
                in_flight.fetch_sub(1, Ordering::SeqCst);
                return;
            }
        }
    }
    if !cfg.index_table.is_empty() {
        pending.index.extend(index::index_rows(&span));
    }
    if !cfg.operations_table.is_empty() {
        pending.operations.push(index::operation_row(&span));
    }
    pending.span_count += 1;
}

async fn flush(
    backend: &dyn Backend,
    cfg: &WriterConfig,
    pending: &mut PendingBatch,
    in_flight: &AtomicUsize,
) {
    let batch = pending.take();

    if !batch.spans.is_empty()
        && let Err(error) = backend.insert_spans(&cfg.spans_table, &batch.spans).await
    {
        warn!(
            %error,
            table = %cfg.spans_table,
            spans = batch.spans.len(),
            "dropped span batch after failed bulk insert"
        );
    }
    if !batch.index.is_empty()
        && let Err(error) = backend.insert_index(&cfg.index_table, &batch.index).await
    {
        warn!(
            %error,
            table = %cfg.index_table,
            rows = batch.index.len(),
            "dropped index batch after failed bulk insert"
        );
    }
    if !batch.operations.is_empty()
        && let Err(error) = backend
            .insert_operations(&cfg.operations_table, &batch.operations)
            .await
    {
        warn!(
            %error,
            table = %cfg.operations_table,
            rows = batch.operations.len(),
            "dropped operations batch after failed bulk insert"
        );
    }

    in_flight.fetch_sub(batch.span_count, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, sample_span};

    fn test_config(batch_size: usize, flush_interval: Duration, max: usize) -> WriterConfig {
        WriterConfig {
            spans_table: TableName::new("test_spans"),
            index_table: TableName::new("test_index"),
            operations_table: TableName::new("test_operations"),
            encoding: Encoding::Json,
            batch_size,
            flush_interval,
            max_span_count: max,
        }
    }

    #[tokio::test]
    async fn size_trigger_flushes_a_full_batch() {
        let backend = Arc::new(MockBackend::new());
        let writer = SpanWriter::new(backend.clone(), test_config(2, Duration::from_secs(60), 100));

        writer.write_span(sample_span(1)).await.unwrap();
        writer.write_span(sample_span(2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let inserts = backend.span_inserts();
        assert_eq!(inserts.len(), 1);
        assert_eq!(inserts[0].0, "test_spans");
        assert_eq!(inserts[0].1.len(), 2);
        assert_eq!(writer.in_flight(), 0);
    }

    #[tokio::test]
    async fn time_trigger_flushes_a_partial_batch() {
        let backend = Arc::new(MockBackend::new());
        let writer = SpanWriter::new(
            backend.clone(),
            test_config(1000, Duration::from_millis(10), 100),
        );

        writer.write_span(sample_span(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(backend.span_inserts().len(), 1);
        assert_eq!(writer.in_flight(), 0);
    }

    #[tokio::test]
    async fn writes_fan_out_to_all_three_tables() {
        let backend = Arc::new(MockBackend::new());
        let writer = SpanWriter::new(backend.clone(), test_config(1, Duration::from_secs(60), 100));

        let span = sample_span(1);
        let expected_index_rows = index::index_rows(&span).len();
        writer.write_span(span).await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(backend.span_inserts().len(), 1);
        let index_inserts = backend.index_inserts();
        assert_eq!(index_inserts.len(), 1);
        assert_eq!(index_inserts[0].0, "test_index");
        assert_eq!(index_inserts[0].1.len(), expected_index_rows);
        let operation_inserts = backend.operation_inserts();
        assert_eq!(operation_inserts.len(), 1);
        assert_eq!(operation_inserts[0].1.len(), 1);
    }

    #[tokio::test]
    async fn overload_rejects_the_span_beyond_the_cap() {
        let backend = Arc::new(MockBackend::new());
        let writer = SpanWriter::new(backend.clone(), test_config(1000, Duration::from_secs(60), 2));

        writer.write_span(sample_span(1)).await.unwrap();
        writer.write_span(sample_span(2)).await.unwrap();
        let err = writer.write_span(sample_span(3)).await.unwrap_err();
        assert!(matches!(err, TracehouseError::Overloaded));

        // The first two still land on close.
        writer.close().await.unwrap();
        let inserts = backend.span_inserts();
        assert_eq!(inserts.len(), 1);
        assert_eq!(inserts[0].1.len(), 2);
        assert_eq!(writer.in_flight(), 0);
    }

    #[tokio::test]
    async fn cap_frees_up_after_a_flush() {
        let backend = Arc::new(MockBackend::new());
        let writer = SpanWriter::new(backend.clone(), test_config(1, Duration::from_secs(60), 1));

        writer.write_span(sample_span(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        writer.write_span(sample_span(2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(backend.span_inserts().len(), 2);
        assert_eq!(writer.in_flight(), 0);
    }

    #[tokio::test]
    async fn failed_insert_drops_the_batch_and_keeps_flowing() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_next_span_insert();
        let writer = SpanWriter::new(backend.clone(), test_config(1, Duration::from_secs(60), 100));

        writer.write_span(sample_span(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        // The failure released the cap and did not poison the writer.
        assert_eq!(writer.in_flight(), 0);

        writer.write_span(sample_span(2)).await.unwrap();
        writer.close().await.unwrap();

        let inserts = backend.span_inserts();
        assert_eq!(inserts.len(), 2);
        assert_eq!(writer.in_flight(), 0);
    }

    #[tokio::test]
    async fn close_rejects_new_spans() {
        let backend = Arc::new(MockBackend::new());
        let writer = SpanWriter::new(backend.clone(), test_config(10, Duration::from_secs(60), 100));

        writer.close().await.unwrap();
        let err = writer.write_span(sample_span(1)).await.unwrap_err();
        assert!(matches!(err, TracehouseError::Closed));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_concurrent() {
        let backend = Arc::new(MockBackend::new());
        let writer = Arc::new(SpanWriter::new(
            backend.clone(),
            test_config(10, Duration::from_secs(60), 100),
        ));
        writer.write_span(sample_span(1)).await.unwrap();

        let a = Arc::clone(&writer);
        let b = Arc::clone(&writer);
        let (ra, rb) = tokio::join!(a.close(), b.close());
        ra.unwrap();
        rb.unwrap();
        writer.close().await.unwrap();

        assert_eq!(backend.span_inserts().len(), 1);
    }

    #[tokio::test]
    async fn archive_writer_skips_index_and_operations() {
        let backend = Arc::new(MockBackend::new());
        let mut store_cfg = Config {
            spans_table: TableName::new("jaeger_spans"),
            ..Config::default()
        };
        store_cfg.set_defaults();
        let writer = SpanWriter::new(backend.clone(), WriterConfig::archive_from_config(&store_cfg));

        writer.write_span(sample_span(1)).await.unwrap();
        writer.close().await.unwrap();

        let inserts = backend.span_inserts();
        assert_eq!(inserts.len(), 1);
        assert_eq!(inserts[0].0, "jaeger_spans_archive");
        assert!(backend.index_inserts().is_empty());
        assert!(backend.operation_inserts().is_empty());
    }
}
