//! Commerce pipeline service
//!
//! Wires the Kafka transaction source, the dedupe stage, the fan-out
//! router, and the five sink pipelines into one long-running process with
//! configuration, logging, and signal-driven shutdown.

pub mod config;
pub mod logging;
pub mod pipeline;
pub mod signals;
pub mod sinks;

pub use config::PipelineConfig;
pub use logging::initialize_logging;
pub use pipeline::Pipeline;
pub use signals::setup_signal_handlers;
