//! Supervised worker task for one sink pipeline

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::sink::{Sink, SinkFailure};

/// Spawn the worker task that drains one sink's channel.
///
/// The worker runs until the channel closes, then flushes the sink and
/// exits. Every error is caught here and forwarded to the error channel;
/// nothing escapes the task boundary.
pub fn spawn_sink_worker<E: Send + 'static>(
    name: String,
    mut rx: mpsc::Receiver<E>,
    mut sink: Box<dyn Sink<E>>,
    errors: mpsc::UnboundedSender<SinkFailure>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(sink = %name, "sink worker started");

        let mut ticker = sink.tick_interval().map(tokio::time::interval);

        loop {
            let event = if let Some(ticker) = ticker.as_mut() {
                tokio::select! {
                    maybe = rx.recv() => maybe,
                    _ = ticker.tick() => {
                        if let Err(e) = sink.tick().await {
                            error!(sink = %name, error = %e, "sink tick failed");
                            let _ = errors.send(SinkFailure::new(&name, e));
                        }
                        continue;
                    }
                }
            } else {
                rx.recv().await
            };

            match event {
                Some(event) => {
                    if let Err(e) = sink.deliver(event).await {
                        error!(sink = %name, error = %e, "sink delivery failed");
                        let _ = errors.send(SinkFailure::new(&name, e));
                    }
                }
                None => break,
            }
        }

        // Channel closed: drain whatever the sink still buffers.
        if let Err(e) = sink.flush().await {
            error!(sink = %name, error = %e, "final flush failed");
            let _ = errors.send(SinkFailure::new(&name, e));
        }

        info!(sink = %name, "sink worker drained and stopped");
    })
}
