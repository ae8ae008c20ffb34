use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use evb_wire::Fragment;

/// A fragment as held in a source queue, tagged with the wall-clock time
/// it was received (used for the `WallClock` build-window mode and for
/// data-late detection).
pub type QueuedFragment = (Instant, Fragment);

/// Per-source input queue and its bookkeeping.
pub struct SourceQueue {
    pub queue_id: u32,
    pub queue: VecDeque<QueuedFragment>,
    /// Timestamp of the newest fragment ever accepted into this queue.
    pub newest_timestamp: u64,
    /// Timestamp of the tail (most recently pushed) fragment.
    pub last_timestamp: u64,
    /// Timestamp of the most recent fragment popped off this queue.
    pub last_popped_timestamp: u64,
    pub bytes_in_queue: u64,
    pub bytes_dequeued: u64,
    pub total_bytes_queued: u64,
    pub xoffed: bool,
}

impl SourceQueue {
    pub fn new(queue_id: u32) -> Self {
        SourceQueue {
            queue_id,
            queue: VecDeque::new(),
            newest_timestamp: 0,
            last_timestamp: 0,
            last_popped_timestamp: 0,
            bytes_in_queue: 0,
            bytes_dequeued: 0,
            total_bytes_queued: 0,
            xoffed: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Insert `frag` keeping the queue sorted by timestamp: fast-pathed
    /// to an append when the fragment is already the new tail (the common
    /// case for well-behaved sources), otherwise reverse-scanned to find
    /// its insertion point.
    pub fn insert_sorted(&mut self, received_at: Instant, frag: Fragment) {
        let ts = frag.timestamp();
        let size = frag.wire_len() as u64;

        self.bytes_in_queue += size;
        self.total_bytes_queued += size;
        self.newest_timestamp = ts;

        if self.queue.is_empty() || ts >= self.last_timestamp {
            self.queue.push_back((received_at, frag));
            self.last_timestamp = ts;
            return;
        }

        let pos = self
            .queue
            .iter()
            .rposition(|(_, q)| q.timestamp() <= ts)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.queue.insert(pos, (received_at, frag));
    }

    /// Timestamp of the oldest non-barrier fragment, scanning from the
    /// tail backward (cheaper when most of the queue is barrier-free, as
    /// is the common case). Returns `None` if every fragment is a barrier
    /// or the queue is empty.
    pub fn oldest_non_barrier_stamp(&self) -> Option<u64> {
        self.queue
            .iter()
            .rev()
            .find(|(_, f)| !f.is_barrier())
            .map(|(_, f)| f.timestamp())
    }

    pub fn front_is_barrier(&self) -> bool {
        self.queue.front().map(|(_, f)| f.is_barrier()).unwrap_or(false)
    }
}

/// Registered sources, ordered by id for deterministic iteration.
pub type Sources = BTreeMap<u32, SourceQueue>;

/// A barrier attempt's outcome: which sources presented a barrier fragment
/// at the head of their queue, which didn't, and what type each presented.
#[derive(Debug, Clone, Default)]
pub struct BarrierSummary {
    pub types_present: Vec<(u32, u32)>,
    pub missing_sources: Vec<u32>,
}

impl BarrierSummary {
    pub fn is_good(&self) -> bool {
        self.missing_sources.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueStatistics {
    pub queue_id: u32,
    pub depth: usize,
    pub bytes_in_queue: u64,
    pub bytes_dequeued: u64,
    pub total_bytes_queued: u64,
    pub oldest_timestamp: u64,
    pub newest_timestamp: u64,
}

#[derive(Debug, Clone, Default)]
pub struct InputStatistics {
    pub total_fragments_queued: usize,
    pub oldest_timestamp: u64,
    pub newest_timestamp: u64,
    pub queues: Vec<QueueStatistics>,
}
