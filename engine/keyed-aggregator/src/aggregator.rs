//! Generic keyed reducer over sharded accumulator storage

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

use crate::{shard_for_key, DEFAULT_SHARDS};

type ExtractFn<K, E> = Box<dyn Fn(&E) -> K + Send + Sync>;
type CombineFn<E, A> = Box<dyn Fn(Option<A>, &E) -> A + Send + Sync>;

/// Stateful per-key reducer.
///
/// One accumulator per distinct key, created on first occurrence and never
/// deleted while the process runs. Unbounded key cardinality is an accepted
/// resource-growth risk, not handled here.
pub struct KeyedAggregator<K, E, A> {
    shards: Vec<Mutex<HashMap<K, A>>>,
    extract: ExtractFn<K, E>,
    combine: CombineFn<E, A>,
}

impl<K, E, A> KeyedAggregator<K, E, A>
where
    K: Hash + Eq + Clone,
    A: Clone,
{
    /// Create an aggregator with the default shard count
    pub fn new(
        extract: impl Fn(&E) -> K + Send + Sync + 'static,
        combine: impl Fn(Option<A>, &E) -> A + Send + Sync + 'static,
    ) -> Self {
        Self::with_shards(DEFAULT_SHARDS, extract, combine)
    }

    /// Create an aggregator partitioned across `shards` lock domains
    pub fn with_shards(
        shards: usize,
        extract: impl Fn(&E) -> K + Send + Sync + 'static,
        combine: impl Fn(Option<A>, &E) -> A + Send + Sync + 'static,
    ) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
            extract: Box::new(extract),
            combine: Box::new(combine),
        }
    }

    /// Fold one event into its key's accumulator and return the updated
    /// snapshot.
    ///
    /// The shard lock is held for the duration of the combine, which
    /// serializes same-key updates; different keys hash to different shards
    /// and proceed in parallel.
    pub fn process(&self, event: &E) -> A {
        let key = (self.extract)(event);
        let shard = &self.shards[shard_for_key(&key, self.shards.len())];

        let mut table = shard.lock();
        let existing = table.remove(&key);
        let updated = (self.combine)(existing, event);
        table.insert(key, updated.clone());
        updated
    }

    /// Number of distinct keys currently tracked
    pub fn key_count(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Clone out every accumulator's latest snapshot
    pub fn snapshots(&self) -> Vec<A> {
        self.shards.iter().flat_map(|s| s.lock().values().cloned().collect::<Vec<_>>()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Sale {
        category: String,
        amount: i64,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct RunningTotal {
        category: String,
        total: i64,
    }

    fn sales_aggregator() -> KeyedAggregator<String, Sale, RunningTotal> {
        KeyedAggregator::new(
            |sale: &Sale| sale.category.clone(),
            |existing, sale: &Sale| {
                let total = existing.map(|t: RunningTotal| t.total).unwrap_or(0);
                RunningTotal { category: sale.category.clone(), total: total + sale.amount }
            },
        )
    }

    #[test]
    fn creates_accumulator_on_first_occurrence() {
        let agg = sales_aggregator();
        let out = agg.process(&Sale { category: "electronics".into(), amount: 100 });
        assert_eq!(out, RunningTotal { category: "electronics".into(), total: 100 });
        assert_eq!(agg.key_count(), 1);
    }

    #[test]
    fn sums_per_key_independently() {
        let agg = sales_aggregator();
        agg.process(&Sale { category: "electronics".into(), amount: 100 });
        agg.process(&Sale { category: "grocery".into(), amount: 20 });
        let out = agg.process(&Sale { category: "electronics".into(), amount: 50 });

        assert_eq!(out.total, 150);
        assert_eq!(agg.key_count(), 2);
    }

    #[test]
    fn final_totals_are_order_independent_across_keys() {
        let events = vec![
            Sale { category: "electronics".into(), amount: 100 },
            Sale { category: "grocery".into(), amount: 20 },
            Sale { category: "electronics".into(), amount: 50 },
        ];

        let forward = sales_aggregator();
        for e in &events {
            forward.process(e);
        }

        let reversed = sales_aggregator();
        for e in events.iter().rev() {
            reversed.process(e);
        }

        let mut fwd = forward.snapshots();
        let mut rev = reversed.snapshots();
        fwd.sort_by(|a, b| a.category.cmp(&b.category));
        rev.sort_by(|a, b| a.category.cmp(&b.category));
        assert_eq!(fwd, rev);
    }

    #[test]
    fn concurrent_updates_to_one_key_never_lose_increments() {
        use std::sync::Arc;

        let agg = Arc::new(sales_aggregator());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let agg = Arc::clone(&agg);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    agg.process(&Sale { category: "electronics".into(), amount: 1 });
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let totals = agg.snapshots();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].total, 8000);
    }

    #[test]
    fn single_shard_still_isolates_keys() {
        let agg = KeyedAggregator::with_shards(
            1,
            |sale: &Sale| sale.category.clone(),
            |existing, sale: &Sale| {
                let total = existing.map(|t: RunningTotal| t.total).unwrap_or(0);
                RunningTotal { category: sale.category.clone(), total: total + sale.amount }
            },
        );
        agg.process(&Sale { category: "a".into(), amount: 1 });
        agg.process(&Sale { category: "b".into(), amount: 2 });
        assert_eq!(agg.key_count(), 2);
    }
}
