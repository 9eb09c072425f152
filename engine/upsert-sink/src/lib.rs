//! Batched idempotent upsert sinks
//!
//! `BatchedUpsertSink` buffers records and flushes bounded batches on a
//! size or interval trigger, retrying transient store failures within a bounded
//! budget. The write itself goes through an [`UpsertWriter`], whose Postgres
//! implementations use insert-or-update-on-conflict statements keyed by each
//! record's natural key, so redelivery of the same logical record converges
//! instead of double-counting.

pub mod batch;
pub mod error;
pub mod postgres;
pub mod writer;

pub use batch::{BatchConfig, BatchedUpsertSink, SinkMetrics};
pub use error::{Result, SinkError};
pub use postgres::{
    init_schema, CategorySalesWriter, DailySalesWriter, MonthlySalesWriter, TransactionsWriter,
};
pub use writer::UpsertWriter;
