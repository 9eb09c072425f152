//! Sink progress acknowledgments and the flushed watermark

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle a sink pipeline uses to acknowledge durable progress.
///
/// `ack(seq)` means every event this sink received up to `seq` is durable
/// or consciously dropped and reported. Acks may repeat or regress; the
/// monitor keeps the maximum per sink.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: usize,
    tx: mpsc::UnboundedSender<(usize, u64)>,
}

impl ProgressReporter {
    pub fn ack(&self, seq: u64) {
        let _ = self.tx.send((self.sink, seq));
    }
}

/// Create one reporter per sink plus the ack stream the monitor consumes
pub fn progress_reporters(
    sinks: usize,
) -> (Vec<ProgressReporter>, mpsc::UnboundedReceiver<(usize, u64)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let reporters =
        (0..sinks).map(|sink| ProgressReporter { sink, tx: tx.clone() }).collect();
    (reporters, rx)
}

/// Fold per-sink acknowledgments into the global flushed watermark.
///
/// The watermark is the minimum over every sink's highest acknowledged
/// sequence: an event is only considered consumed once ALL sinks have it.
/// The task ends when every reporter is dropped (workers drained) and
/// returns the final watermark for the drain-path commit.
pub fn spawn_watermark_monitor(
    sinks: usize,
    mut acks: mpsc::UnboundedReceiver<(usize, u64)>,
    watermark: watch::Sender<u64>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut acked = vec![0u64; sinks.max(1)];

        while let Some((sink, seq)) = acks.recv().await {
            if sink >= acked.len() || seq <= acked[sink] {
                continue;
            }
            acked[sink] = seq;

            let floor = acked.iter().copied().min().unwrap_or(0);
            if floor > *watermark.borrow() {
                debug!(floor, "flushed watermark advanced");
                let _ = watermark.send(floor);
            }
        }

        acked.iter().copied().min().unwrap_or(0)
    })
}
