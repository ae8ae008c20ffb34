//! The fragment handler (C1): the single-writer owner of every source
//! queue. Only this type's thread ever mutates engine state; producers
//! hand it raw byte blocks or pre-parsed fragments and everything else —
//! insertion order, barrier detection, flow control, flush policy — is
//! decided here.
//!
//! Grounded on `CFragmentHandler.h`/`CFragmentHandler.cpp`.

use std::collections::{BTreeSet, HashMap};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use evb_wire::{parse_block, Fragment, FragmentHeader, NULL_TIMESTAMP};
use log::warn;

use crate::config::{BuildWindowMode, EngineConfig};
use crate::error::{EvbError, Result};
use crate::observer::ObserverRegistry;
use crate::source_queue::{BarrierSummary, InputStatistics, QueueStatistics, SourceQueue, Sources};
use crate::stats::{EngineStats, OutOfOrderStatistics, OutOfOrderTracker};

/// One batch handed to the sort thread: one sorted sub-list per source
/// that had material dequeued this round.
pub type SortBatch = Vec<Vec<Fragment>>;

/// A transport-level connection identifier, used only to group sources
/// for `mark_socket_failed`/`revive_socket` and to keep per-connection
/// byte remainders for block parsing. Not interpreted further here.
pub type ConnId = u64;

pub struct FragmentHandler {
    config: EngineConfig,
    sources: Sources,
    dead_sources: BTreeSet<u32>,
    socket_sources: HashMap<ConnId, Vec<u32>>,
    source_socket: HashMap<u32, ConnId>,
    remainders: HashMap<ConnId, Bytes>,

    barrier_pending: bool,

    oldest: Option<u64>,
    newest: Option<u64>,
    most_recently_popped: u64,

    xoffed_global: bool,

    start_time: Instant,
    startup_deadline: Instant,

    observers: Arc<ObserverRegistry>,
    stats: Arc<EngineStats>,
    oos_tracker: Arc<OutOfOrderTracker>,

    out_tx: SyncSender<SortBatch>,
}

impl FragmentHandler {
    pub fn new(
        config: EngineConfig,
        observers: Arc<ObserverRegistry>,
        stats: Arc<EngineStats>,
        out_tx: SyncSender<SortBatch>,
    ) -> Self {
        let oos_tracker = Arc::new(OutOfOrderTracker::new());
        observers.add_non_monotonic_timestamp_observer(oos_tracker.clone());

        let now = Instant::now();
        let startup_timeout = config.startup_timeout;
        FragmentHandler {
            config,
            sources: Sources::new(),
            dead_sources: BTreeSet::new(),
            socket_sources: HashMap::new(),
            source_socket: HashMap::new(),
            remainders: HashMap::new(),
            barrier_pending: false,
            oldest: None,
            newest: None,
            most_recently_popped: 0,
            xoffed_global: false,
            start_time: now,
            startup_deadline: now + startup_timeout,
            observers,
            stats,
            oos_tracker,
            out_tx,
        }
    }

    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    pub fn out_of_order_statistics(&self) -> OutOfOrderStatistics {
        self.oos_tracker.snapshot()
    }

    // ---- source lifecycle --------------------------------------------

    pub fn register_source(&mut self, source_id: u32) {
        self.sources
            .entry(source_id)
            .or_insert_with(|| SourceQueue::new(source_id));
        self.dead_sources.remove(&source_id);
    }

    pub fn register_source_on_socket(&mut self, source_id: u32, conn: ConnId) {
        self.register_source(source_id);
        self.socket_sources.entry(conn).or_default().push(source_id);
        self.source_socket.insert(source_id, conn);
    }

    /// A source that will never send more data but whose queue should be
    /// left alone: the build-window "every source present" requirement
    /// and barrier completeness no longer wait on it. If a barrier is
    /// pending and every remaining live source has already presented one,
    /// that barrier is resolved right now — always as partial, since it
    /// only went through because a source died, not because it was
    /// genuinely complete.
    pub fn mark_source_failed(&mut self, source_id: u32) {
        self.dead_sources.insert(source_id);
        self.resolve_barrier_after_source_death();
    }

    pub fn mark_socket_failed(&mut self, conn: ConnId) {
        if let Some(sources) = self.socket_sources.get(&conn).cloned() {
            for source_id in sources {
                self.dead_sources.insert(source_id);
            }
        }
        self.resolve_barrier_after_source_death();
    }

    pub fn revive_socket(&mut self, conn: ConnId) {
        if let Some(sources) = self.socket_sources.get(&conn).cloned() {
            for source_id in sources {
                self.dead_sources.remove(&source_id);
            }
        }
        self.remainders.remove(&conn);
    }

    pub fn drop_socket(&mut self, conn: ConnId) {
        self.mark_socket_failed(conn);
        self.remainders.remove(&conn);
    }

    // ---- ingestion ------------------------------------------------------

    /// Parse as many complete fragments as possible out of `block`, using
    /// (and updating) the byte remainder left over from the previous call
    /// on this connection, then process them exactly as [`Self::add_fragments`].
    pub fn add_block(&mut self, conn: ConnId, block: &[u8]) -> Result<()> {
        let mut combined = BytesMut::new();
        if let Some(leftover) = self.remainders.remove(&conn) {
            combined.extend_from_slice(&leftover);
        }
        combined.extend_from_slice(block);

        let parsed = parse_block(&combined);
        self.remainders.insert(conn, parsed.remainder);
        self.add_fragments(parsed.fragments)
    }

    /// Process a batch of already-parsed fragments: insert each into its
    /// source queue, then run one flush/Xoff pass.
    pub fn add_fragments(&mut self, fragments: Vec<Fragment>) -> Result<()> {
        for frag in fragments {
            self.add_fragment(frag)?;
        }
        self.flush_queues(false);
        self.check_xoff();
        Ok(())
    }

    fn add_fragment(&mut self, frag: Fragment) -> Result<()> {
        self.stats.record_received(frag.wire_len() as u64);
        let source_id = frag.source_id();

        self.sources
            .entry(source_id)
            .or_insert_with(|| SourceQueue::new(source_id));

        if frag.is_barrier() {
            self.barrier_pending = true;
        }

        let (mut ts, assigned) = if frag.timestamp() == NULL_TIMESTAMP {
            let carried = self.sources[&source_id].newest_timestamp;
            (carried, true)
        } else {
            (frag.timestamp(), false)
        };

        let queue = self.sources.get_mut(&source_id).expect("just inserted");
        let had_data = !queue.is_empty();

        if had_data && ts == queue.newest_timestamp && !assigned {
            self.observers.notify_duplicate_timestamp(source_id, ts);
            self.stats.duplicate_timestamps.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }

        if had_data && ts < queue.last_timestamp {
            self.observers
                .notify_non_monotonic_timestamp(source_id, queue.last_timestamp, ts);
            self.stats
                .non_monotonic_timestamps
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            // Never let an out-of-order arrival corrupt the queue's sort
            // order bookkeeping: still insert in timestamp order, just
            // don't let it masquerade as the new newest value below.
            ts = ts.min(queue.last_timestamp);
        }

        let frag = if assigned {
            Fragment::new(
                FragmentHeader {
                    timestamp: ts,
                    ..frag.header
                },
                frag.payload,
            )
        } else {
            frag
        };

        queue.insert_sorted(Instant::now(), frag);
        self.check_queue_xoff(source_id);

        if let Some(prior_newest) = self.newest {
            if ts > prior_newest && ts - prior_newest > self.config.build_window.as_millis() as u64 * 1_000 {
                warn!("source {source_id} jumped timestamp forward to {ts} (was {prior_newest})");
            }
        }
        self.newest = Some(self.newest.map_or(ts, |n| n.max(ts)));
        self.oldest.get_or_insert(ts);

        Ok(())
    }

    // ---- flush ----------------------------------------------------------

    fn no_empty_live_queue(&self) -> bool {
        self.sources
            .iter()
            .filter(|(id, _)| !self.dead_sources.contains(id))
            .all(|(_, q)| !q.is_empty())
    }

    fn find_stamp_mark(&self) -> Option<u64> {
        self.sources
            .iter()
            .filter(|(id, _)| !self.dead_sources.contains(id))
            .filter_map(|(_, q)| q.oldest_non_barrier_stamp())
            .min()
    }

    /// Run one flush pass. `complete` drains every queue unconditionally
    /// (used for an explicit `flush` control verb and shutdown).
    pub fn flush_queues(&mut self, complete: bool) {
        let effective_mode = if !complete && Instant::now() < self.startup_deadline {
            BuildWindowMode::WallClock
        } else {
            self.config.build_window_mode
        };

        let mut batch: SortBatch = Vec::new();
        let source_ids: Vec<u32> = self.sources.keys().copied().collect();

        if complete {
            // A forced flush classifies whatever barrier is pending
            // first (complete_flush always decides, never waits), then
            // sweeps up everything left over, barrier-stranded data
            // included.
            if self.barrier_pending {
                if let Some(barrier_batch) = self.check_barrier(true) {
                    batch.extend(barrier_batch);
                }
            }
            for source_id in &source_ids {
                let drained = self.drain_all(*source_id);
                if !drained.is_empty() {
                    batch.push(drained);
                }
            }
        } else {
            match effective_mode {
                BuildWindowMode::StampMark => {
                    if self.no_empty_live_queue() {
                        if let Some(stamp) = self.find_stamp_mark() {
                            for source_id in &source_ids {
                                let dequeued = self.dequeue_until_stamp(*source_id, stamp);
                                if !dequeued.is_empty() {
                                    batch.push(dequeued);
                                }
                            }
                        }
                    }
                }
                BuildWindowMode::WallClock => {
                    let window_end = Instant::now()
                        .checked_sub(self.config.build_window)
                        .unwrap_or_else(Instant::now);
                    for source_id in &source_ids {
                        let dequeued = self.dequeue_until_abs_time(*source_id, window_end);
                        if !dequeued.is_empty() {
                            batch.push(dequeued);
                        }
                    }
                }
            }
        }

        if !complete && self.barrier_pending {
            if let Some(barrier_batch) = self.check_barrier(false) {
                batch.extend(barrier_batch);
            }
        }

        self.check_xon();
        self.emit_batch(batch);
    }

    /// Hand a non-empty batch to the sort thread, bumping the matching
    /// counters and notifying `EventReadyObserver`s first. Shared by the
    /// ordinary flush path, `abort_barrier`, and the barrier-on-source-death
    /// check, all of which can produce a batch outside of `flush_queues`'s
    /// own dequeue loop.
    fn emit_batch(&mut self, batch: SortBatch) {
        if batch.is_empty() {
            return;
        }
        self.stats.flushes.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let emitted_frags: u64 = batch.iter().map(|l| l.len() as u64).sum();
        let emitted_bytes: u64 = batch
            .iter()
            .flat_map(|l| l.iter())
            .map(|f| f.wire_len() as u64)
            .sum();
        self.stats.record_emitted(emitted_frags, emitted_bytes);
        self.observers.notify_event_ready(
            &batch.iter().flatten().cloned().collect::<Vec<_>>(),
        );
        if self.out_tx.send(batch).is_err() {
            warn!("sort thread channel closed; dropping a completed batch");
        }
    }

    fn drain_all(&mut self, source_id: u32) -> Vec<Fragment> {
        let Some(queue) = self.sources.get_mut(&source_id) else {
            return Vec::new();
        };
        let out: Vec<Fragment> = queue.queue.drain(..).map(|(_, f)| f).collect();
        self.handle_dequeued(source_id, &out);
        out
    }

    /// Pop everything at or before `stamp` from `source_id`'s queue. A
    /// barrier fragment at the head always halts the scan rather than
    /// being swept past the boundary like ordinary data: popping a
    /// barrier is check_barrier's job alone, never the build-window
    /// dequeue's.
    fn dequeue_until_stamp(&mut self, source_id: u32, stamp: u64) -> Vec<Fragment> {
        let Some(queue) = self.sources.get_mut(&source_id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while let Some((_, front)) = queue.queue.front() {
            if !front.is_barrier() && front.timestamp() <= stamp {
                out.push(queue.queue.pop_front().unwrap().1);
            } else {
                break;
            }
        }
        self.handle_dequeued(source_id, &out);
        out
    }

    fn dequeue_until_abs_time(&mut self, source_id: u32, window_end: Instant) -> Vec<Fragment> {
        let Some(queue) = self.sources.get_mut(&source_id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while let Some((received_at, front)) = queue.queue.front() {
            if !front.is_barrier() && *received_at <= window_end {
                out.push(queue.queue.pop_front().unwrap().1);
            } else {
                break;
            }
        }
        self.handle_dequeued(source_id, &out);
        out
    }

    fn handle_dequeued(&mut self, source_id: u32, dequeued: &[Fragment]) {
        if dequeued.is_empty() {
            return;
        }

        let bytes: u64 = dequeued.iter().map(|f| f.wire_len() as u64).sum();
        if let Some(queue) = self.sources.get_mut(&source_id) {
            queue.bytes_in_queue = queue.bytes_in_queue.saturating_sub(bytes);
            queue.bytes_dequeued += bytes;
            queue.last_popped_timestamp = dequeued.last().map(|f| f.timestamp()).unwrap_or(queue.last_popped_timestamp);
        }

        for frag in dequeued {
            let ts = frag.timestamp();
            if ts < self.most_recently_popped {
                self.observers.notify_data_late(frag, self.most_recently_popped);
                self.stats.late_fragments.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            } else {
                self.most_recently_popped = ts;
            }
        }

        self.check_queue_xon(source_id);
    }

    // ---- explicit flush / reset ------------------------------------------

    pub fn flush(&mut self) {
        self.flush_queues(true);
        self.oldest = None;
        self.newest = None;
    }

    /// Force a decision on a stalled barrier attempt without waiting for
    /// the malformed-barrier timeout: whatever's present at every live
    /// source's head is popped and classified good or partial right now,
    /// mirroring `abortBarrierProcessing`'s `countPresentBarriers` +
    /// `goodBarrier`/`generateMalformedBarrier` call.
    pub fn abort_barrier(&mut self) {
        if !self.barrier_pending {
            return;
        }
        if let Some(batch) = self.check_barrier(true) {
            self.emit_batch(batch);
        }
    }

    pub fn reset_timestamps(&mut self) {
        self.oldest = None;
        self.newest = None;
        self.most_recently_popped = 0;
    }

    pub fn clear_queues(&mut self) {
        for queue in self.sources.values_mut() {
            queue.queue.clear();
            queue.bytes_in_queue = 0;
        }
    }

    /// Called periodically by an idle timer so build windows still drain
    /// and Xon still re-fires even when no new fragments are arriving.
    pub fn idle_poll(&mut self) {
        self.flush_queues(false);
        self.check_xon();
    }

    // ---- barriers ---------------------------------------------------------

    fn live_source_ids(&self) -> Vec<u32> {
        self.sources
            .keys()
            .filter(|id| !self.dead_sources.contains(id))
            .copied()
            .collect()
    }

    fn oldest_barrier_receipt(&self) -> Instant {
        self.sources
            .values()
            .filter_map(|q| q.queue.front())
            .filter(|(_, f)| f.is_barrier())
            .map(|(received_at, _)| *received_at)
            .min()
            .unwrap_or_else(Instant::now)
    }

    /// Checks whether every live source has a barrier at the head of its
    /// queue. If so (or if `complete_flush`/the malformed-barrier timeout
    /// forces a decision), pops those barriers, classifies the attempt as
    /// good or partial, notifies the matching observer, and forwards the
    /// popped barrier fragments downstream. Returns `None` while still
    /// waiting on more sources.
    fn check_barrier(&mut self, complete_flush: bool) -> Option<SortBatch> {
        let live = self.live_source_ids();
        // An empty queue does NOT count as ready: it means the source
        // simply hasn't delivered its barrier yet, which is exactly the
        // case this check exists to wait out (until the timeout below
        // gives up and reports it missing instead).
        let all_ready = live.iter().all(|id| self.sources[id].front_is_barrier());

        let timed_out = Instant::now().duration_since(self.oldest_barrier_receipt())
            > self.config.build_window * self.config.malformed_barrier_window_multiplier;

        if !all_ready && !complete_flush && !timed_out {
            return None;
        }

        let mut summary = BarrierSummary::default();
        let mut popped_batch: SortBatch = Vec::new();

        for source_id in &live {
            let queue = self.sources.get_mut(source_id).expect("live source exists");
            if queue.front_is_barrier() {
                let (_, frag) = queue.queue.pop_front().unwrap();
                summary.types_present.push((*source_id, frag.header.barrier_type));
                popped_batch.push(vec![frag]);
            } else {
                summary.missing_sources.push(*source_id);
            }
        }

        self.barrier_pending = false;

        if summary.is_good() {
            self.stats.good_barriers.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.observers.notify_good_barrier(&summary);
        } else {
            self.stats.partial_barriers.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.observers.notify_partial_barrier(&summary);
        }

        if popped_batch.is_empty() {
            None
        } else {
            Some(popped_batch)
        }
    }

    /// `CFragmentHandler.cpp`'s `markSourceFailed`: if a barrier is
    /// pending and every still-live source has already presented one, the
    /// barrier is done — but because one source never will, it's always
    /// reported partial, not good, unlike the general `check_barrier`
    /// path where "all present" means genuinely good.
    fn resolve_barrier_after_source_death(&mut self) {
        if !self.barrier_pending {
            return;
        }
        let live = self.live_source_ids();
        let all_present = !live.is_empty() && live.iter().all(|id| self.sources[id].front_is_barrier());
        if !all_present {
            return;
        }

        let mut summary = BarrierSummary::default();
        let mut popped_batch: SortBatch = Vec::new();
        for source_id in &live {
            let queue = self.sources.get_mut(source_id).expect("live source exists");
            let (_, frag) = queue.queue.pop_front().expect("checked front_is_barrier above");
            summary.types_present.push((*source_id, frag.header.barrier_type));
            popped_batch.push(vec![frag]);
        }

        self.barrier_pending = false;
        self.stats.partial_barriers.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.observers.notify_partial_barrier(&summary);
        self.emit_batch(popped_batch);
    }

    // ---- flow control -------------------------------------------------------

    fn total_in_flight(&self) -> usize {
        self.sources.values().map(SourceQueue::len).sum()
    }

    fn check_xoff(&mut self) {
        let total = self.total_in_flight();
        if !self.xoffed_global && total >= self.config.xoff_frags {
            self.xoffed_global = true;
            self.stats.xoff_events.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.observers.notify_xoff();
        }
    }

    fn check_xon(&mut self) {
        let total = self.total_in_flight();
        if self.xoffed_global && total <= self.config.xon_frags {
            self.xoffed_global = false;
            self.stats.xon_events.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.observers.notify_xon();
        }
    }

    fn check_queue_xoff(&mut self, source_id: u32) {
        let Some(queue) = self.sources.get_mut(&source_id) else {
            return;
        };
        if !queue.xoffed && queue.len() >= self.config.per_queue_xoff_frags {
            queue.xoffed = true;
            self.observers.notify_xoff_queue(source_id);
        }
    }

    fn check_queue_xon(&mut self, source_id: u32) {
        let Some(queue) = self.sources.get_mut(&source_id) else {
            return;
        };
        if queue.xoffed && queue.len() <= self.config.per_queue_xon_frags {
            queue.xoffed = false;
            self.observers.notify_xon_queue(source_id);
        }
    }

    // ---- statistics -----------------------------------------------------

    pub fn statistics(&self) -> InputStatistics {
        let queues = self
            .sources
            .values()
            .map(|q| QueueStatistics {
                queue_id: q.queue_id,
                depth: q.len(),
                bytes_in_queue: q.bytes_in_queue,
                bytes_dequeued: q.bytes_dequeued,
                total_bytes_queued: q.total_bytes_queued,
                oldest_timestamp: q.queue.front().map(|(_, f)| f.timestamp()).unwrap_or(0),
                newest_timestamp: q.newest_timestamp,
            })
            .collect();

        InputStatistics {
            total_fragments_queued: self.total_in_flight(),
            oldest_timestamp: self.oldest.unwrap_or(0),
            newest_timestamp: self.newest.unwrap_or(0),
            queues,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn error_for_unknown_source(&self, source_id: u32) -> Result<()> {
        if self.sources.contains_key(&source_id) {
            Ok(())
        } else {
            Err(EvbError::UnknownSource(source_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evb_wire::FragmentHeader;
    use std::sync::mpsc::sync_channel;

    fn frag(ts: u64, source: u32, barrier: u32) -> Fragment {
        Fragment::new(
            FragmentHeader {
                timestamp: ts,
                source_id: source,
                payload_size: 0,
                barrier_type: barrier,
            },
            Bytes::new(),
        )
    }

    fn handler_no_startup_delay() -> (FragmentHandler, std::sync::mpsc::Receiver<SortBatch>) {
        let mut config = EngineConfig::default();
        config.startup_timeout = Duration::from_secs(0);
        config.build_window_mode = BuildWindowMode::StampMark;
        let (tx, rx) = sync_channel(16);
        let handler = FragmentHandler::new(
            config,
            Arc::new(ObserverRegistry::new()),
            Arc::new(EngineStats::new()),
            tx,
        );
        (handler, rx)
    }

    #[test]
    fn stamp_mark_mode_waits_for_every_live_source() {
        let (mut handler, rx) = handler_no_startup_delay();
        handler.register_source(0);
        handler.register_source(1);

        handler.add_fragments(vec![frag(10, 0, 0), frag(20, 0, 0)]).unwrap();
        assert!(rx.try_recv().is_err(), "source 1 never sent anything yet");

        handler.add_fragments(vec![frag(15, 1, 0)]).unwrap();
        let batch = rx.try_recv().expect("flush should have happened");
        let flat: Vec<u64> = batch.iter().flatten().map(|f| f.timestamp()).collect();
        assert!(flat.contains(&10));
    }

    #[test]
    fn duplicate_timestamp_is_observed() {
        let (mut handler, _rx) = handler_no_startup_delay();
        handler.register_source(0);
        handler.add_fragments(vec![frag(10, 0, 0)]).unwrap();
        handler.add_fragments(vec![frag(10, 0, 0)]).unwrap();
        let stats = handler.stats().clone();
        assert_eq!(stats.duplicate_timestamps.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn non_monotonic_timestamp_is_observed_and_tracked() {
        let (mut handler, _rx) = handler_no_startup_delay();
        handler.register_source(0);
        handler.add_fragments(vec![frag(10, 0, 0)]).unwrap();
        handler.add_fragments(vec![frag(5, 0, 0)]).unwrap();

        let oos = handler.out_of_order_statistics();
        assert_eq!(oos.totals.count, 1);
        assert_eq!(oos.totals.prior_timestamp, 10);
        assert_eq!(oos.totals.timestamp, 5);
    }

    #[test]
    fn good_barrier_fires_when_every_source_presents_one() {
        let (mut handler, rx) = handler_no_startup_delay();
        handler.register_source(0);
        handler.register_source(1);

        handler.add_fragments(vec![frag(10, 0, 1)]).unwrap();
        handler.add_fragments(vec![frag(10, 1, 1)]).unwrap();

        let batch = rx.try_recv().expect("barrier should have flushed through");
        assert_eq!(batch.iter().flatten().count(), 2);
        let stats = handler.stats().clone();
        assert_eq!(stats.good_barriers.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn dead_source_does_not_block_stamp_mark_flushing() {
        let (mut handler, rx) = handler_no_startup_delay();
        handler.register_source(0);
        handler.register_source(1);
        handler.mark_source_failed(1);

        handler.add_fragments(vec![frag(10, 0, 0), frag(20, 0, 0)]).unwrap();
        let batch = rx.try_recv().expect("dead source should not block the flush");
        assert!(!batch.is_empty());
    }

    #[test]
    fn complete_flush_drains_everything_regardless_of_mode() {
        let (mut handler, rx) = handler_no_startup_delay();
        handler.register_source(0);
        handler.register_source(1);
        handler.add_fragments(vec![frag(10, 0, 0)]).unwrap();
        let _ = rx.try_recv();

        handler.flush();
        let batch = rx.try_recv().expect("explicit flush always drains");
        assert_eq!(batch.iter().flatten().count(), 1);
    }

    #[test]
    fn unknown_source_is_an_error() {
        let (handler, _rx) = handler_no_startup_delay();
        assert!(handler.error_for_unknown_source(99).is_err());
    }

    #[test]
    fn abort_barrier_forces_a_partial_decision() {
        let (mut handler, rx) = handler_no_startup_delay();
        handler.register_source(0);
        handler.register_source(1);

        handler.add_fragments(vec![frag(10, 0, 1)]).unwrap();
        assert!(rx.try_recv().is_err(), "source 1 hasn't presented its barrier yet");

        handler.abort_barrier();
        let batch = rx.try_recv().expect("abort_barrier should force a decision");
        assert_eq!(batch.iter().flatten().count(), 1);
        let stats = handler.stats().clone();
        assert_eq!(stats.partial_barriers.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(stats.good_barriers.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn abort_barrier_is_a_no_op_without_a_pending_barrier() {
        let (mut handler, rx) = handler_no_startup_delay();
        handler.register_source(0);
        handler.abort_barrier();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn mark_source_failed_resolves_a_pending_barrier_as_partial() {
        let (mut handler, rx) = handler_no_startup_delay();
        handler.register_source(0);
        handler.register_source(1);

        handler.add_fragments(vec![frag(10, 0, 1)]).unwrap();
        assert!(rx.try_recv().is_err(), "source 1 hasn't presented its barrier yet");

        handler.mark_source_failed(1);
        let batch = rx.try_recv().expect("source death should resolve the pending barrier");
        assert_eq!(batch.iter().flatten().count(), 1);
        let stats = handler.stats().clone();
        assert_eq!(stats.partial_barriers.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(stats.good_barriers.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
