//! Sharded per-key running aggregation
//!
//! `KeyedAggregator` is a generic stateful reducer: given a key-extraction
//! function and a combine function it keeps one accumulator per distinct
//! key and returns the updated snapshot on every input. Accumulator storage
//! is partitioned across a fixed number of shards by key hash; each shard
//! owns its own lock, so updates to the same key are strictly serialized
//! while unrelated keys never contend.
//!
//! `EventDeduper` is the companion idempotency filter: it remembers every
//! event id it has admitted so a redelivered event is dropped before it can
//! be summed into a running total a second time.

pub mod aggregator;
pub mod dedupe;

pub use aggregator::KeyedAggregator;
pub use dedupe::EventDeduper;

pub(crate) const DEFAULT_SHARDS: usize = 16;

/// Stable shard index for a hashable key
pub(crate) fn shard_for_key<K: std::hash::Hash>(key: &K, shards: usize) -> usize {
    use std::hash::Hasher;
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % shards
}
