//! The consumer pull loop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use commerce_events::{DecodeError, IngestedTransaction, Transaction};

use crate::config::SourceConfig;
use crate::ledger::OffsetLedger;

/// Errors that stop the source for good.
///
/// Per-record decode failures are not here on purpose: they are counted and
/// skipped inside the loop.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Consumer creation or subscription failed
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// The pipeline side of the channel is gone; nothing left to feed
    #[error("pipeline channel closed")]
    PipelineClosed,
}

/// Counters for source activity
#[derive(Debug, Default)]
pub struct SourceMetrics {
    pub delivered: AtomicU64,
    pub malformed: AtomicU64,
    pub committed: AtomicU64,
    pub consumer_errors: AtomicU64,
}

impl SourceMetrics {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }
}

/// Unbounded, restartable transaction stream off the partitioned log.
///
/// Each record is decoded, validated, stamped with the processing time and a
/// monotone sequence, and sent into the pipeline channel. Its offset is NOT
/// committed at that point: it is parked in the [`OffsetLedger`] until the
/// sink watermark acknowledges the sequence, meaning every sink has made the
/// event durable (or consciously dropped and reported it). A crash replays
/// everything still parked — at-least-once, with no window where a buffered
/// event's offset is already committed.
pub struct TransactionSource {
    consumer: StreamConsumer,
    topic: String,
    metrics: Arc<SourceMetrics>,
    ledger: OffsetLedger,
    next_seq: AtomicU64,
}

impl TransactionSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = config.consumer_config().create()?;
        consumer.subscribe(&[&config.topic])?;

        info!(brokers = %config.brokers, topic = %config.topic, group = %config.group_id,
            "subscribed to transaction log");

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            metrics: Arc::new(SourceMetrics::default()),
            ledger: OffsetLedger::new(),
            next_seq: AtomicU64::new(0),
        })
    }

    pub fn metrics(&self) -> Arc<SourceMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Pull until shutdown is signalled or the pipeline goes away.
    ///
    /// A full pipeline channel blocks this loop (bounded-queue
    /// backpressure); consumer errors are logged and the loop keeps going,
    /// since the client recovers transient broker trouble on its own.
    /// `watermark` carries the highest sequence every sink has acknowledged;
    /// each advance releases the corresponding offsets for commit.
    pub async fn run(
        &self,
        tx: mpsc::Sender<IngestedTransaction>,
        mut shutdown: watch::Receiver<bool>,
        mut watermark: watch::Receiver<u64>,
    ) -> Result<(), SourceError> {
        let mut stream = self.consumer.stream();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                changed = watermark.changed() => {
                    if changed.is_ok() {
                        let acked = *watermark.borrow_and_update();
                        self.commit_acknowledged(acked, CommitMode::Async);
                    }
                }
                next = stream.next() => match next {
                    None => break,
                    Some(Err(e)) => {
                        self.metrics.consumer_errors.fetch_add(1, Ordering::Relaxed);
                        error!(error = %e, "consumer error");
                    }
                    Some(Ok(message)) => self.handle(&message, &tx).await?,
                },
            }
        }

        info!(
            delivered = self.metrics.delivered(),
            malformed = self.metrics.malformed(),
            "transaction source stopped"
        );
        Ok(())
    }

    async fn handle(
        &self,
        message: &BorrowedMessage<'_>,
        tx: &mpsc::Sender<IngestedTransaction>,
    ) -> Result<(), SourceError> {
        match decode_event(message.payload()) {
            Ok(mut event) => {
                event.seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
                self.ledger.record(event.seq, message.partition(), message.offset());
                tx.send(event).await.map_err(|_| SourceError::PipelineClosed)?;
                self.metrics.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(reason) => {
                self.metrics.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    partition = message.partition(),
                    offset = message.offset(),
                    %reason,
                    "skipping malformed record"
                );
                // Parked under the last assigned sequence: the skip is
                // committed once the surrounding traffic is acknowledged.
                let seq = self.next_seq.load(Ordering::Relaxed);
                self.ledger.record(seq, message.partition(), message.offset());
            }
        }
        Ok(())
    }

    /// Final commit after the sinks have drained, synchronous so it lands
    /// before the process exits.
    pub fn commit_final(&self, acked: u64) {
        self.commit_acknowledged(acked, CommitMode::Sync);
    }

    /// Commit every parked offset at or below the acknowledged sequence.
    ///
    /// A failed commit only widens the replay window: the next successful
    /// commit of a higher offset covers it.
    fn commit_acknowledged(&self, acked: u64, mode: CommitMode) {
        let committable = self.ledger.take_committable(acked);
        if committable.is_empty() {
            return;
        }

        let mut positions = TopicPartitionList::new();
        for (partition, next_offset) in &committable {
            if let Err(e) =
                positions.add_partition_offset(&self.topic, *partition, Offset::Offset(*next_offset))
            {
                warn!(partition, next_offset, error = %e, "could not stage offset for commit");
            }
        }

        match self.consumer.commit(&positions, mode) {
            Ok(()) => {
                self.metrics.committed.fetch_add(committable.len() as u64, Ordering::Relaxed);
                debug!(acked, partitions = committable.len(), "committed acknowledged offsets");
            }
            Err(e) => warn!(error = %e, "offset commit failed"),
        }
    }
}

/// Decode one raw payload into a stamped event
pub fn decode_event(payload: Option<&[u8]>) -> Result<IngestedTransaction, DecodeError> {
    let bytes = payload.ok_or_else(|| DecodeError::Invalid("empty payload".to_string()))?;
    let transaction = Transaction::from_payload(bytes)?;
    Ok(IngestedTransaction::now(transaction))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_missing_payload() {
        assert!(decode_event(None).is_err());
    }

    #[test]
    fn decode_rejects_garbage_payload() {
        assert!(decode_event(Some(b"{\"broken\": true}")).is_err());
    }

    #[test]
    fn decode_stamps_processing_time() {
        let payload = br#"{
            "transaction_id": "txn-7",
            "product_id": "p1",
            "product_name": "Toaster",
            "product_category": "appliances",
            "product_price": 25.0,
            "product_quantity": 1,
            "product_brand": "acme",
            "total_amount": 25.0,
            "currency": "USD",
            "customer_id": "c1",
            "transaction_date": "2024-06-01T09:00:00Z",
            "payment_method": "cash"
        }"#;

        let event = decode_event(Some(payload)).unwrap();
        assert_eq!(event.transaction.transaction_id, "txn-7");
        // Bucketing follows ingestion time, not the event-time field.
        assert_eq!(event.day(), chrono::Utc::now().date_naive());
        // The sequence is assigned by the source, not the decoder.
        assert_eq!(event.seq, 0);
    }
}
