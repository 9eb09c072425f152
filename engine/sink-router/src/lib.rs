//! Fan-out routing with isolated sink workers
//!
//! One inbound event is duplicated onto N bounded outbound channels, each
//! consumed by an independently supervised worker driving a [`Sink`]. A full
//! channel blocks the producer (backpressure), never drops silently. A
//! worker's failure is caught at its boundary, reported on the shared error
//! channel, and never propagated to the other sinks.

pub mod progress;
pub mod router;
pub mod sink;
pub mod worker;

pub use progress::{progress_reporters, spawn_watermark_monitor, ProgressReporter};
pub use router::{RouteError, RouterMetrics, SinkRouter};
pub use sink::{BoxError, Sink, SinkFailure};
pub use worker::spawn_sink_worker;
