//! Buffer-and-flush sink with bounded retry

use std::time::Duration;

use async_trait::async_trait;
use sink_router::{BoxError, Sink};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, SinkError};
use crate::writer::UpsertWriter;

/// Flush and retry tuning for one sink
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum records buffered before a flush is forced
    pub batch_size: usize,

    /// Maximum time since the last flush before a non-empty buffer is
    /// flushed again
    pub batch_interval: Duration,

    /// Maximum write attempts per batch, first try included
    pub max_retries: u32,

    /// Base delay between attempts; grows linearly with the attempt number
    pub retry_backoff: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            batch_interval: Duration::from_millis(200),
            max_retries: 5,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Counters for one sink's flush activity
#[derive(Debug, Default, Clone, Copy)]
pub struct SinkMetrics {
    pub accepted: u64,
    pub flushed_batches: u64,
    pub flushed_records: u64,
    pub failed_batches: u64,
}

/// Buffers records and writes them in bounded batches.
///
/// A flush happens when the buffer reaches `batch_size` or once
/// `batch_interval` has passed since the last flush, whichever comes first.
/// Each flush writes
/// the records as they were at batching time, which for aggregate records is
/// the latest accumulator snapshot: re-writing the same key is
/// last-write-wins and therefore safe under at-least-once delivery.
pub struct BatchedUpsertSink<R, W> {
    writer: W,
    config: BatchConfig,
    buffer: Vec<R>,
    last_flush: Instant,
    metrics: SinkMetrics,
}

impl<R, W: UpsertWriter<R>> BatchedUpsertSink<R, W> {
    pub fn new(writer: W, config: BatchConfig) -> Self {
        Self {
            writer,
            config,
            buffer: Vec::new(),
            last_flush: Instant::now(),
            metrics: SinkMetrics::default(),
        }
    }

    /// Buffer one record, flushing if that fills the batch
    pub async fn accept(&mut self, record: R) -> Result<()> {
        self.buffer.push(record);
        self.metrics.accepted += 1;

        if self.buffer.len() >= self.config.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Flush if the interval trigger has fired
    pub async fn flush_if_stale(&mut self) -> Result<()> {
        if !self.buffer.is_empty() && self.last_flush.elapsed() >= self.config.batch_interval {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write the current buffer, retrying transient failures.
    ///
    /// Permanent failures surface immediately without consuming the budget;
    /// spending the whole budget raises one `RetriesExhausted` and drops the
    /// batch (the failure is the caller's to report, never silent).
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            self.last_flush = Instant::now();
            return Ok(());
        }

        let batch = std::mem::take(&mut self.buffer);
        self.last_flush = Instant::now();

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.writer.write_batch(&batch).await {
                Ok(()) => {
                    self.metrics.flushed_batches += 1;
                    self.metrics.flushed_records += batch.len() as u64;
                    debug!(records = batch.len(), attempts, "batch flushed");
                    return Ok(());
                }
                Err(SinkError::Transient(last)) => {
                    if attempts >= self.config.max_retries {
                        self.metrics.failed_batches += 1;
                        return Err(SinkError::RetriesExhausted { attempts, last });
                    }
                    let delay = self.config.retry_backoff * attempts;
                    warn!(
                        attempts,
                        max = self.config.max_retries,
                        error = %last,
                        "transient flush failure, retrying after {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    self.metrics.failed_batches += 1;
                    return Err(err);
                }
            }
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn metrics(&self) -> SinkMetrics {
        self.metrics
    }
}

#[async_trait]
impl<R, W> Sink<R> for BatchedUpsertSink<R, W>
where
    R: Send + 'static,
    W: UpsertWriter<R> + 'static,
{
    async fn deliver(&mut self, record: R) -> std::result::Result<(), BoxError> {
        self.accept(record).await.map_err(Into::into)
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.config.batch_interval)
    }

    async fn tick(&mut self) -> std::result::Result<(), BoxError> {
        self.flush_if_stale().await.map_err(Into::into)
    }

    async fn flush(&mut self) -> std::result::Result<(), BoxError> {
        BatchedUpsertSink::flush(self).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Writer that records batches and fails the first `fail_first` writes
    struct ScriptedWriter {
        batches: Arc<Mutex<Vec<Vec<u32>>>>,
        failures_left: Arc<Mutex<u32>>,
        permanent: bool,
    }

    impl ScriptedWriter {
        fn reliable(batches: Arc<Mutex<Vec<Vec<u32>>>>) -> Self {
            Self { batches, failures_left: Arc::new(Mutex::new(0)), permanent: false }
        }

        fn failing(fail_first: u32, batches: Arc<Mutex<Vec<Vec<u32>>>>) -> Self {
            Self { batches, failures_left: Arc::new(Mutex::new(fail_first)), permanent: false }
        }
    }

    #[async_trait]
    impl UpsertWriter<u32> for ScriptedWriter {
        async fn write_batch(&self, batch: &[u32]) -> Result<()> {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                if self.permanent {
                    return Err(SinkError::Permanent("constraint violation".to_string()));
                }
                return Err(SinkError::Transient("connection reset".to_string()));
            }
            self.batches.lock().push(batch.to_vec());
            Ok(())
        }
    }

    fn config(batch_size: usize, max_retries: u32) -> BatchConfig {
        BatchConfig {
            batch_size,
            batch_interval: Duration::from_millis(200),
            max_retries,
            retry_backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn flushes_when_batch_size_reached() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let mut sink = BatchedUpsertSink::new(ScriptedWriter::reliable(batches.clone()), config(3, 3));

        sink.accept(1).await.unwrap();
        sink.accept(2).await.unwrap();
        assert_eq!(sink.buffered(), 2);
        assert!(batches.lock().is_empty());

        sink.accept(3).await.unwrap();
        assert_eq!(sink.buffered(), 0);
        assert_eq!(*batches.lock(), vec![vec![1, 2, 3]]);
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_when_interval_elapses() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let mut sink =
            BatchedUpsertSink::new(ScriptedWriter::reliable(batches.clone()), config(100, 3));

        sink.accept(7).await.unwrap();
        sink.flush_if_stale().await.unwrap();
        assert!(batches.lock().is_empty());

        tokio::time::advance(Duration::from_millis(250)).await;
        sink.flush_if_stale().await.unwrap();
        assert_eq!(*batches.lock(), vec![vec![7]]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_retries_within_budget() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let mut sink =
            BatchedUpsertSink::new(ScriptedWriter::failing(2, batches.clone()), config(1, 3));

        sink.accept(5).await.unwrap();

        assert_eq!(*batches.lock(), vec![vec![5]]);
        assert_eq!(sink.metrics().flushed_batches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_raises_exactly_one_error_and_drops_batch() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let mut sink =
            BatchedUpsertSink::new(ScriptedWriter::failing(10, batches.clone()), config(1, 3));

        let err = sink.accept(9).await.unwrap_err();
        assert!(matches!(err, SinkError::RetriesExhausted { attempts: 3, .. }));

        // The batch is dropped, not retried forever.
        assert_eq!(sink.buffered(), 0);
        assert!(batches.lock().is_empty());
        assert_eq!(sink.metrics().failed_batches, 1);

        // The next record flows normally once the store recovers.
        sink.accept(10).await.unwrap();
        assert_eq!(*batches.lock(), vec![vec![10]]);
    }

    #[tokio::test]
    async fn permanent_failure_skips_the_retry_budget() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let writer = ScriptedWriter {
            batches: batches.clone(),
            failures_left: Arc::new(Mutex::new(1)),
            permanent: true,
        };
        let mut sink = BatchedUpsertSink::new(writer, config(1, 5));

        let err = sink.accept(1).await.unwrap_err();
        assert!(matches!(err, SinkError::Permanent(_)));
        assert_eq!(sink.metrics().failed_batches, 1);
    }

    #[tokio::test]
    async fn final_flush_drains_partial_buffer() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let mut sink =
            BatchedUpsertSink::new(ScriptedWriter::reliable(batches.clone()), config(100, 3));

        sink.accept(1).await.unwrap();
        sink.accept(2).await.unwrap();
        sink.flush().await.unwrap();

        assert_eq!(*batches.lock(), vec![vec![1, 2]]);
    }
}
