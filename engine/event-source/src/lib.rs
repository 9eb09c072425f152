//! Partitioned-log transaction source
//!
//! Pulls raw records from the transaction topic, decodes them into typed
//! events, stamps the processing time, and hands them to the pipeline over
//! a bounded channel. Offsets are parked in an `OffsetLedger` and committed
//! only once the sink watermark acknowledges the event, so a crash replays
//! everything still buffered anywhere in the pipeline (at-least-once);
//! malformed records are skipped and counted, never fatal.

pub mod config;
pub mod ledger;
pub mod source;

pub use config::{SourceConfig, StartingOffset};
pub use ledger::OffsetLedger;
pub use source::{SourceError, SourceMetrics, TransactionSource};
