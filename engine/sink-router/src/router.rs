//! Distribution point fanning one event stream out to every sink pipeline

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::sink::{Sink, SinkFailure};
use crate::worker::spawn_sink_worker;

/// Routing errors.
///
/// A single unavailable sink is not an error (it is reported and skipped);
/// losing every sink is fatal to the pipeline.
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("all sink pipelines are unavailable")]
    AllSinksUnavailable,
}

/// Counters for routed traffic
#[derive(Debug, Default, Clone, Copy)]
pub struct RouterMetrics {
    pub routed: u64,
    /// Sinks excluded from fan-out after their channel closed
    pub sinks_closed: u64,
}

struct SinkRoute<E> {
    name: String,
    tx: mpsc::Sender<E>,
    /// Set once the worker's channel is observed closed, so a dead sink is
    /// reported a single time rather than once per event.
    closed: bool,
}

/// Stateless fan-out point: duplicates each event onto every registered
/// sink's bounded channel.
///
/// `route` blocks (via `send().await`) while a sink's channel is full; a
/// slow sink degrades throughput through backpressure but is never allowed
/// to lose events, and a dead sink never blocks the rest.
pub struct SinkRouter<E> {
    routes: Vec<SinkRoute<E>>,
    errors: mpsc::UnboundedSender<SinkFailure>,
    workers: Vec<JoinHandle<()>>,
    metrics: RouterMetrics,
}

impl<E: Clone + Send + 'static> SinkRouter<E> {
    pub fn new(errors: mpsc::UnboundedSender<SinkFailure>) -> Self {
        Self { routes: Vec::new(), errors, workers: Vec::new(), metrics: RouterMetrics::default() }
    }

    /// Register a sink pipeline: a bounded channel of `capacity` plus a
    /// supervised worker task consuming it.
    pub fn register(&mut self, name: impl Into<String>, capacity: usize, sink: Box<dyn Sink<E>>) {
        let name = name.into();
        let (tx, rx) = mpsc::channel(capacity);
        let handle = spawn_sink_worker(name.clone(), rx, sink, self.errors.clone());
        self.routes.push(SinkRoute { name, tx, closed: false });
        self.workers.push(handle);
    }

    /// Fan one event out to every live sink pipeline.
    ///
    /// Delivery to each sink is independent: a closed channel (dead worker)
    /// is reported once and skipped from then on. Only the loss of every
    /// sink is an error.
    pub async fn route(&mut self, event: E) -> Result<(), RouteError> {
        let mut delivered = 0usize;

        for route in &mut self.routes {
            if route.closed {
                continue;
            }
            match route.tx.send(event.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => {
                    route.closed = true;
                    self.metrics.sinks_closed += 1;
                    warn!(sink = %route.name, "sink channel closed, excluding from fan-out");
                    let _ = self.errors.send(SinkFailure::new(
                        &route.name,
                        format!("sink {} is no longer accepting events", route.name),
                    ));
                }
            }
        }

        if delivered == 0 && !self.routes.is_empty() {
            return Err(RouteError::AllSinksUnavailable);
        }

        self.metrics.routed += 1;
        Ok(())
    }

    pub fn metrics(&self) -> RouterMetrics {
        self.metrics
    }

    /// Close every channel and wait for the workers to drain and stop.
    ///
    /// In-flight events are delivered and buffered sinks get their final
    /// flush before this returns.
    pub async fn shutdown(self) {
        drop(self.routes);
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "sink worker panicked during shutdown");
            }
        }
    }
}
