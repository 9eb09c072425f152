//! Bookkeeping between delivered events and committable offsets

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct PendingOffset {
    seq: u64,
    partition: i32,
    offset: i64,
}

/// Tracks the log position of every event handed into the pipeline until
/// the sinks acknowledge it.
///
/// Entries are recorded in stream order, so sequences are monotone
/// non-decreasing front to back. `take_committable` releases only entries
/// at or below the acknowledged watermark; everything above it stays
/// pending and will be replayed after a crash.
#[derive(Debug, Default)]
pub struct OffsetLedger {
    pending: Mutex<VecDeque<PendingOffset>>,
}

impl OffsetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one consumed record's position under the given sequence.
    ///
    /// Skipped records (malformed payloads) are recorded under the last
    /// assigned sequence so their offsets ride along with the surrounding
    /// acknowledged traffic.
    pub fn record(&self, seq: u64, partition: i32, offset: i64) {
        self.pending.lock().push_back(PendingOffset { seq, partition, offset });
    }

    /// Release every entry with `seq <= up_to` and return, per partition,
    /// the next offset to commit (highest released offset plus one).
    pub fn take_committable(&self, up_to: u64) -> Vec<(i32, i64)> {
        let mut pending = self.pending.lock();
        let mut next_offsets: HashMap<i32, i64> = HashMap::new();

        while let Some(entry) = pending.front().copied() {
            if entry.seq > up_to {
                break;
            }
            pending.pop_front();
            let next = next_offsets.entry(entry.partition).or_insert(0);
            *next = (*next).max(entry.offset + 1);
        }

        next_offsets.into_iter().collect()
    }

    /// Number of recorded positions not yet released
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unacknowledged_offsets_are_not_released() {
        let ledger = OffsetLedger::new();
        ledger.record(1, 0, 10);
        ledger.record(2, 0, 11);
        ledger.record(3, 0, 12);

        // Sinks have only flushed through sequence 2; offset 12 must stay
        // pending so a restart replays it.
        let committable = ledger.take_committable(2);
        assert_eq!(committable, vec![(0, 12)]);
        assert_eq!(ledger.pending_count(), 1);

        // Nothing new acknowledged, nothing released.
        assert!(ledger.take_committable(2).is_empty());

        let rest = ledger.take_committable(3);
        assert_eq!(rest, vec![(0, 13)]);
        assert_eq!(ledger.pending_count(), 0);
    }

    #[test]
    fn partitions_release_independently() {
        let ledger = OffsetLedger::new();
        ledger.record(1, 0, 100);
        ledger.record(2, 1, 7);
        ledger.record(3, 0, 101);

        let mut committable = ledger.take_committable(3);
        committable.sort_unstable();
        assert_eq!(committable, vec![(0, 102), (1, 8)]);
    }

    #[test]
    fn skipped_records_ride_with_the_watermark() {
        let ledger = OffsetLedger::new();
        ledger.record(1, 0, 5);
        // A malformed record at offset 6 is recorded under the last
        // assigned sequence.
        ledger.record(1, 0, 6);

        assert_eq!(ledger.take_committable(1), vec![(0, 7)]);
    }

    #[test]
    fn watermark_zero_releases_only_leading_skips() {
        let ledger = OffsetLedger::new();
        // Malformed records before any delivered event carry sequence 0.
        ledger.record(0, 2, 40);
        ledger.record(1, 2, 41);

        assert_eq!(ledger.take_committable(0), vec![(2, 41)]);
        assert_eq!(ledger.pending_count(), 1);
    }
}
