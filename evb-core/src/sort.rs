//! The sort thread (C2): merges the per-source sorted sub-lists the
//! fragment handler hands it into a single globally time-ordered list.
//!
//! Grounded on `CSortThread.cpp`'s `merge()`, which dispatches on the
//! number of input lists: a straight splice for one, a two-way
//! head-comparison merge for two, and an n-way merge backed by a
//! `std::multimap` acting as a min-heap for more than two. The idiomatic
//! translation of that min-heap is `std::collections::BinaryHeap` over
//! `Reverse<(timestamp, list index)>`.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::mpsc::{Receiver, SyncSender};

use evb_wire::Fragment;
use log::warn;

pub type SortBatch = Vec<Vec<Fragment>>;

/// Merge `lists` (each individually sorted by timestamp) into one
/// globally sorted `Vec<Fragment>`, preserving duplicate timestamps and
/// the relative order of equal-timestamp fragments drawn from the same
/// list.
pub fn merge(lists: Vec<Vec<Fragment>>) -> Vec<Fragment> {
    match lists.len() {
        0 => Vec::new(),
        1 => lists.into_iter().next().unwrap(),
        2 => merge_two(lists),
        _ => merge_n(lists),
    }
}

fn merge_two(mut lists: Vec<Vec<Fragment>>) -> Vec<Fragment> {
    let mut b = lists.pop().unwrap();
    let mut a = lists.pop().unwrap();
    a.reverse();
    b.reverse();

    let mut out = Vec::with_capacity(a.len() + b.len());
    loop {
        match (a.last(), b.last()) {
            (Some(x), Some(y)) => {
                if x.timestamp() <= y.timestamp() {
                    out.push(a.pop().unwrap());
                } else {
                    out.push(b.pop().unwrap());
                }
            }
            (Some(_), None) => out.extend(a.drain(..).rev()),
            (None, Some(_)) => out.extend(b.drain(..).rev()),
            (None, None) => break,
        }
        if a.is_empty() || b.is_empty() {
            out.extend(a.drain(..).rev());
            out.extend(b.drain(..).rev());
            break;
        }
    }
    out
}

fn merge_n(lists: Vec<Vec<Fragment>>) -> Vec<Fragment> {
    use std::collections::VecDeque;

    let mut queues: Vec<VecDeque<Fragment>> =
        lists.into_iter().map(VecDeque::from).collect();

    let total: usize = queues.iter().map(VecDeque::len).sum();
    let mut out = Vec::with_capacity(total);

    let mut heap: BinaryHeap<Reverse<(u64, usize)>> = BinaryHeap::new();
    for (idx, q) in queues.iter().enumerate() {
        if let Some(front) = q.front() {
            heap.push(Reverse((front.timestamp(), idx)));
        }
    }

    while let Some(Reverse((_, idx))) = heap.pop() {
        let frag = queues[idx].pop_front().expect("heap entry implies a front element");
        out.push(frag);
        if let Some(next) = queues[idx].front() {
            heap.push(Reverse((next.timestamp(), idx)));
        }
    }

    out
}

/// Drives the sort thread body: repeatedly blocks on `in_rx`, merges the
/// batch, and forwards the merged run to `out_tx`. Intended to be spawned
/// on a dedicated `std::thread`.
pub fn run(in_rx: Receiver<SortBatch>, out_tx: SyncSender<Vec<Fragment>>) {
    while let Ok(batch) = in_rx.recv() {
        if batch.is_empty() {
            continue;
        }
        let in_flight: usize = batch.iter().map(Vec::len).sum();
        let merged = merge(batch);
        debug_assert_eq!(merged.len(), in_flight);
        if out_tx.send(merged).is_err() {
            warn!("output thread channel closed; sort thread exiting");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use evb_wire::FragmentHeader;

    fn frag(ts: u64, source: u32) -> Fragment {
        Fragment::new(
            FragmentHeader {
                timestamp: ts,
                source_id: source,
                payload_size: 0,
                barrier_type: 0,
            },
            Bytes::new(),
        )
    }

    fn stamps(frags: &[Fragment]) -> Vec<u64> {
        frags.iter().map(|f| f.timestamp()).collect()
    }

    #[test]
    fn single_list_passes_through_unchanged() {
        let list = vec![frag(1, 0), frag(2, 0), frag(3, 0)];
        let merged = merge(vec![list.clone()]);
        assert_eq!(stamps(&merged), stamps(&list));
    }

    #[test]
    fn two_lists_merge_in_timestamp_order() {
        let a = vec![frag(1, 0), frag(3, 0), frag(5, 0)];
        let b = vec![frag(2, 1), frag(4, 1), frag(6, 1)];
        let merged = merge(vec![a, b]);
        assert_eq!(stamps(&merged), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn merge_preserves_duplicate_timestamps() {
        let a = vec![frag(5, 0)];
        let b = vec![frag(5, 1)];
        let merged = merge(vec![a, b]);
        assert_eq!(stamps(&merged), vec![5, 5]);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(merge(vec![]).is_empty());
    }

    #[test]
    fn three_way_merge_uses_the_heap_path() {
        let a = vec![frag(1, 0), frag(4, 0), frag(7, 0)];
        let b = vec![frag(2, 1), frag(5, 1)];
        let c = vec![frag(3, 2), frag(6, 2), frag(8, 2), frag(9, 2)];
        let merged = merge(vec![a, b, c]);
        assert_eq!(stamps(&merged), vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn one_empty_list_among_nonempty_ones_is_harmless() {
        let a = vec![frag(1, 0), frag(2, 0)];
        let b: Vec<Fragment> = vec![];
        let merged = merge(vec![a, b]);
        assert_eq!(stamps(&merged), vec![1, 2]);
    }
}
