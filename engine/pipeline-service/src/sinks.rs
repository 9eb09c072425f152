//! Adapters binding aggregates and raw rows to the batched database sinks
//!
//! Every adapter acknowledges durable progress through its
//! [`ProgressReporter`]: the highest event sequence whose effects have been
//! flushed (or consciously dropped and reported). The minimum across all
//! sinks becomes the watermark the source commits offsets up to.

use std::hash::Hash;

use async_trait::async_trait;
use commerce_events::{IngestedTransaction, Transaction};
use index_sink::IndexSink;
use keyed_aggregator::KeyedAggregator;
use sink_router::{BoxError, ProgressReporter, Sink};
use upsert_sink::{BatchedUpsertSink, UpsertWriter};

/// Sink pipeline for one keyed aggregate table.
///
/// Each delivered event is folded into its key's running accumulator, and
/// the updated snapshot is handed to the batched upsert sink. Later
/// snapshots for the same key overwrite earlier ones in the table, so
/// flushing every snapshot keeps rows correct without any reconciliation.
pub struct AggregatingSink<K, A, W>
where
    W: UpsertWriter<A>,
{
    aggregator: KeyedAggregator<K, IngestedTransaction, A>,
    sink: BatchedUpsertSink<A, W>,
    progress: ProgressReporter,
    highest_seq: u64,
}

impl<K, A, W> AggregatingSink<K, A, W>
where
    K: Hash + Eq + Clone,
    A: Clone,
    W: UpsertWriter<A>,
{
    pub fn new(
        aggregator: KeyedAggregator<K, IngestedTransaction, A>,
        sink: BatchedUpsertSink<A, W>,
        progress: ProgressReporter,
    ) -> Self {
        Self { aggregator, sink, progress, highest_seq: 0 }
    }

    /// An empty buffer means every event seen so far is flushed or was
    /// dropped with its failure reported; either way the offset may move.
    fn ack_if_drained(&self) {
        if self.sink.buffered() == 0 && self.highest_seq > 0 {
            self.progress.ack(self.highest_seq);
        }
    }
}

#[async_trait]
impl<K, A, W> Sink<IngestedTransaction> for AggregatingSink<K, A, W>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    W: UpsertWriter<A> + 'static,
{
    async fn deliver(&mut self, event: IngestedTransaction) -> Result<(), BoxError> {
        self.highest_seq = self.highest_seq.max(event.seq);
        let snapshot = self.aggregator.process(&event);
        let result = self.sink.accept(snapshot).await;
        self.ack_if_drained();
        result.map_err(Into::into)
    }

    fn tick_interval(&self) -> Option<std::time::Duration> {
        Sink::tick_interval(&self.sink)
    }

    async fn tick(&mut self) -> Result<(), BoxError> {
        let result = Sink::tick(&mut self.sink).await;
        self.ack_if_drained();
        result
    }

    async fn flush(&mut self) -> Result<(), BoxError> {
        let result = Sink::flush(&mut self.sink).await;
        self.ack_if_drained();
        result
    }
}

/// Sink pipeline for the raw transactions table.
///
/// Strips the ingestion envelope and batches the bare rows.
pub struct RawTransactionSink<W>
where
    W: UpsertWriter<Transaction>,
{
    sink: BatchedUpsertSink<Transaction, W>,
    progress: ProgressReporter,
    highest_seq: u64,
}

impl<W: UpsertWriter<Transaction>> RawTransactionSink<W> {
    pub fn new(sink: BatchedUpsertSink<Transaction, W>, progress: ProgressReporter) -> Self {
        Self { sink, progress, highest_seq: 0 }
    }

    fn ack_if_drained(&self) {
        if self.sink.buffered() == 0 && self.highest_seq > 0 {
            self.progress.ack(self.highest_seq);
        }
    }
}

#[async_trait]
impl<W> Sink<IngestedTransaction> for RawTransactionSink<W>
where
    W: UpsertWriter<Transaction> + 'static,
{
    async fn deliver(&mut self, event: IngestedTransaction) -> Result<(), BoxError> {
        self.highest_seq = self.highest_seq.max(event.seq);
        let result = self.sink.accept(event.transaction).await;
        self.ack_if_drained();
        result.map_err(Into::into)
    }

    fn tick_interval(&self) -> Option<std::time::Duration> {
        Sink::tick_interval(&self.sink)
    }

    async fn tick(&mut self) -> Result<(), BoxError> {
        let result = Sink::tick(&mut self.sink).await;
        self.ack_if_drained();
        result
    }

    async fn flush(&mut self) -> Result<(), BoxError> {
        let result = Sink::flush(&mut self.sink).await;
        self.ack_if_drained();
        result
    }
}

/// Sink pipeline for the search index.
///
/// Documents are durable as soon as the PUT succeeds (and a document given
/// up on after the retry budget is reported, not replayed), so every
/// delivery acknowledges immediately.
pub struct DocumentSink {
    sink: IndexSink,
    progress: ProgressReporter,
}

impl DocumentSink {
    pub fn new(sink: IndexSink, progress: ProgressReporter) -> Self {
        Self { sink, progress }
    }
}

#[async_trait]
impl Sink<IngestedTransaction> for DocumentSink {
    async fn deliver(&mut self, event: IngestedTransaction) -> Result<(), BoxError> {
        let seq = event.seq;
        let result = self.sink.deliver(event).await;
        self.progress.ack(seq);
        result
    }
}
