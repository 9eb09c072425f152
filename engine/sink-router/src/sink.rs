//! The sink contract driven by router workers

use std::time::Duration;

use async_trait::async_trait;

/// Boxed error crossing the sink boundary
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A failure surfaced by one sink pipeline.
///
/// Reported to the error-observation channel for operator visibility; the
/// event keeps flowing to every other sink.
#[derive(Debug)]
pub struct SinkFailure {
    pub sink: String,
    pub error: BoxError,
}

impl SinkFailure {
    pub fn new(sink: impl Into<String>, error: impl Into<BoxError>) -> Self {
        Self { sink: sink.into(), error: error.into() }
    }
}

/// One sink pipeline's consumption contract.
///
/// `deliver` is called once per routed event in channel order. An error
/// returned here means the sink's own retry budget is already spent; the
/// worker reports it and carries on with the next event.
#[async_trait]
pub trait Sink<E>: Send {
    async fn deliver(&mut self, event: E) -> Result<(), BoxError>;

    /// Interval at which the worker should call [`Sink::tick`].
    ///
    /// `None` for sinks with no time-based work (the default).
    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    /// Periodic callback for time-triggered work such as interval flushes
    async fn tick(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Drain any buffered state; called once when the channel closes
    async fn flush(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}
