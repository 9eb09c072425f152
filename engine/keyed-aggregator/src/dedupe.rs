//! Per-event idempotency tracking
//!
//! The log delivers at-least-once, so the same transaction can arrive more
//! than once. Upsert-by-id converges for the raw table and the search index,
//! but a running total would absorb the amount again on every redelivery.
//! The deduper sits upstream of the aggregators and admits each event id
//! exactly once for the life of the process.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::{shard_for_key, DEFAULT_SHARDS};

/// Sharded seen-set over event ids.
///
/// Memory grows with the number of distinct ids, the same accepted
/// cardinality risk the accumulator tables carry.
pub struct EventDeduper {
    shards: Vec<Mutex<HashSet<String>>>,
    duplicates: Mutex<u64>,
}

impl EventDeduper {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashSet::new())).collect(),
            duplicates: Mutex::new(0),
        }
    }

    /// Admit an event id, returning `true` the first time it is seen.
    ///
    /// Returns `false` for a redelivery, which the caller drops before any
    /// aggregator can double-count it.
    pub fn first_sight(&self, event_id: &str) -> bool {
        let shard = &self.shards[shard_for_key(&event_id, self.shards.len())];
        let fresh = shard.lock().insert(event_id.to_string());
        if !fresh {
            *self.duplicates.lock() += 1;
            tracing::debug!(event_id, "dropped redelivered event");
        }
        fresh
    }

    /// Number of distinct ids admitted so far
    pub fn seen_count(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Number of redeliveries dropped so far
    pub fn duplicate_count(&self) -> u64 {
        *self.duplicates.lock()
    }
}

impl Default for EventDeduper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_each_id_once() {
        let deduper = EventDeduper::new();
        assert!(deduper.first_sight("txn-001"));
        assert!(!deduper.first_sight("txn-001"));
        assert!(deduper.first_sight("txn-002"));

        assert_eq!(deduper.seen_count(), 2);
        assert_eq!(deduper.duplicate_count(), 1);
    }

    #[test]
    fn ids_spread_across_shards_stay_distinct() {
        let deduper = EventDeduper::with_shards(4);
        for i in 0..100 {
            assert!(deduper.first_sight(&format!("txn-{i}")));
        }
        for i in 0..100 {
            assert!(!deduper.first_sight(&format!("txn-{i}")));
        }
        assert_eq!(deduper.seen_count(), 100);
        assert_eq!(deduper.duplicate_count(), 100);
    }
}
