//! Cumulative counters, kept as atomics so any thread can bump them
//! without taking a lock. Grounded on `cognitod::metrics::Metrics`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::observer::NonMonotonicTimestampObserver;

#[derive(Debug, Default)]
pub struct EngineStats {
    pub fragments_received: AtomicU64,
    pub fragments_emitted: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_emitted: AtomicU64,
    pub good_barriers: AtomicU64,
    pub partial_barriers: AtomicU64,
    pub duplicate_timestamps: AtomicU64,
    pub non_monotonic_timestamps: AtomicU64,
    pub late_fragments: AtomicU64,
    pub xoff_events: AtomicU64,
    pub xon_events: AtomicU64,
    pub flushes: AtomicUsize,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, bytes: u64) {
        self.fragments_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_emitted(&self, fragments: u64, bytes: u64) {
        self.fragments_emitted.fetch_add(fragments, Ordering::Relaxed);
        self.bytes_emitted.fetch_add(bytes, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutOfOrderRecord {
    pub count: u64,
    pub prior_timestamp: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default)]
pub struct OutOfOrderStatistics {
    pub totals: OutOfOrderRecord,
    pub by_source: BTreeMap<u32, OutOfOrderRecord>,
}

/// Internal observer that accumulates [`OutOfOrderStatistics`], mirroring
/// `COutOfOrderStatsCommand::MyObserver`. Registered by the engine itself
/// so `out_of_order_statistics()` has something to report without every
/// caller having to wire up their own observer.
#[derive(Default)]
pub struct OutOfOrderTracker {
    stats: Mutex<OutOfOrderStatistics>,
}

impl OutOfOrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> OutOfOrderStatistics {
        self.stats.lock().expect("out-of-order stats poisoned").clone()
    }
}

impl NonMonotonicTimestampObserver for OutOfOrderTracker {
    fn on_non_monotonic_timestamp(&self, source_id: u32, prior_timestamp: u64, this_timestamp: u64) {
        let mut stats = self.stats.lock().expect("out-of-order stats poisoned");
        stats.totals.count += 1;
        stats.totals.prior_timestamp = prior_timestamp;
        stats.totals.timestamp = this_timestamp;

        let entry = stats.by_source.entry(source_id).or_default();
        entry.count += 1;
        entry.prior_timestamp = prior_timestamp;
        entry.timestamp = this_timestamp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_totals_and_per_source_breakdown() {
        let tracker = OutOfOrderTracker::new();
        tracker.on_non_monotonic_timestamp(1, 100, 90);
        tracker.on_non_monotonic_timestamp(2, 200, 150);
        tracker.on_non_monotonic_timestamp(1, 90, 80);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.totals.count, 3);
        assert_eq!(snapshot.totals.prior_timestamp, 90);
        assert_eq!(snapshot.totals.timestamp, 80);

        let source1 = &snapshot.by_source[&1];
        assert_eq!(source1.count, 2);
        assert_eq!(source1.timestamp, 80);

        let source2 = &snapshot.by_source[&2];
        assert_eq!(source2.count, 1);
        assert_eq!(source2.timestamp, 150);
    }
}
