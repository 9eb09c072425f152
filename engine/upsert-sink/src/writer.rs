//! The store-side write contract

use async_trait::async_trait;

use crate::error::Result;

/// Writes one fully-formed batch with idempotent upsert semantics.
///
/// Implementations must key every statement by the record's natural key so
/// that re-running the same batch (retry, redelivery) converges to the same
/// stored state. Statement order within a batch is the slice order.
#[async_trait]
pub trait UpsertWriter<R>: Send + Sync {
    async fn write_batch(&self, batch: &[R]) -> Result<()>;
}
