//! The output thread (C3): batches merged fragment runs into vectored
//! writes against a downstream sink, flushing whenever the accumulated
//! size would exceed a configured maximum write size.
//!
//! Grounded on `COrdererOutput.cpp`, which builds two `iovec`s per
//! fragment (header, body) and calls `writev` once the pending batch
//! would cross the pipe's buffer size (queried via
//! `fcntl(fd, F_GETPIPE_SZ)`, falling back to 1 MiB). The Rust analog of
//! a raw `iovec` array is `std::io::IoSlice` passed to
//! `Write::write_vectored`.

use std::io::{self, IoSlice, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;

use evb_wire::{Fragment, HEADER_SIZE};

use crate::error::{EvbError, Result};

/// Default maximum accumulated write size, matching `COrdererOutput`'s
/// fallback when `F_GETPIPE_SZ` isn't available (writing to a plain file
/// rather than a pipe, for instance).
pub const DEFAULT_MAX_WRITE: usize = 1024 * 1024;

#[derive(Debug, Default)]
pub struct OutputStats {
    pub bytes_written: AtomicU64,
    pub fragments_written: AtomicU64,
    pub writes: AtomicU64,
}

/// Encodes each fragment's header into a small owned buffer so the
/// `IoSlice` borrowing it can sit alongside one borrowing the fragment's
/// payload directly (no header allocation is shared across fragments, to
/// keep the slices valid for the lifetime of one `write_vectored` call).
fn header_bytes(frag: &Fragment) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..8].copy_from_slice(&frag.header.timestamp.to_le_bytes());
    buf[8..12].copy_from_slice(&frag.header.source_id.to_le_bytes());
    buf[12..16].copy_from_slice(&frag.header.payload_size.to_le_bytes());
    buf[16..20].copy_from_slice(&frag.header.barrier_type.to_le_bytes());
    buf
}

/// Writes a batch of merged, time-ordered fragments to `sink`, gathering
/// writes so that no single `write_vectored` call exceeds `max_write`
/// bytes unless an individual fragment is itself larger than that (in
/// which case it's written alone).
pub fn write_batch(sink: &mut impl Write, fragments: &[Fragment], max_write: usize, stats: &OutputStats) -> Result<()> {
    let headers: Vec<[u8; HEADER_SIZE]> = fragments.iter().map(header_bytes).collect();

    let mut start = 0usize;
    let mut pending_size = 0usize;

    for (i, frag) in fragments.iter().enumerate() {
        let frag_size = frag.wire_len();
        if pending_size > 0 && pending_size + frag_size > max_write {
            dump(sink, fragments, &headers, start, i, stats)?;
            start = i;
            pending_size = 0;
        }
        pending_size += frag_size;
    }

    if start < fragments.len() {
        dump(sink, fragments, &headers, start, fragments.len(), stats)?;
    }

    Ok(())
}

fn dump(
    sink: &mut impl Write,
    fragments: &[Fragment],
    headers: &[[u8; HEADER_SIZE]],
    start: usize,
    end: usize,
    stats: &OutputStats,
) -> Result<()> {
    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity((end - start) * 2);
    for i in start..end {
        slices.push(IoSlice::new(&headers[i]));
        slices.push(IoSlice::new(&fragments[i].payload));
    }

    write_all_vectored(sink, &mut slices).map_err(EvbError::DownstreamWriteFailure)?;

    let bytes: u64 = fragments[start..end].iter().map(|f| f.wire_len() as u64).sum();
    stats.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    stats.fragments_written.fetch_add((end - start) as u64, Ordering::Relaxed);
    stats.writes.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

/// `write_vectored` may perform a short write; loop, advancing past the
/// slices (and partially through one) until everything is flushed.
fn write_all_vectored(sink: &mut impl Write, slices: &mut [IoSlice<'_>]) -> io::Result<()> {
    let mut slices = slices;
    while !slices.is_empty() {
        let mut written = sink.write_vectored(slices)?;
        if written == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "write_vectored wrote 0 bytes"));
        }
        while written > 0 {
            let head_len = slices[0].len();
            if written < head_len {
                IoSlice::advance_slices(&mut slices, written);
                written = 0;
            } else {
                written -= head_len;
                slices = &mut slices[1..];
            }
        }
    }
    Ok(())
}

/// Drives the output thread body: blocks on `in_rx` for merged runs and
/// writes each through [`write_batch`]. Intended to be spawned on a
/// dedicated `std::thread`.
pub fn run(in_rx: Receiver<Vec<Fragment>>, mut sink: impl Write, max_write: usize, stats: &OutputStats) {
    while let Ok(run) = in_rx.recv() {
        if run.is_empty() {
            continue;
        }
        if let Err(e) = write_batch(&mut sink, &run, max_write, stats) {
            log::error!("output thread write failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use evb_wire::FragmentHeader;

    fn frag(ts: u64, body: &[u8]) -> Fragment {
        Fragment::new(
            FragmentHeader {
                timestamp: ts,
                source_id: 0,
                payload_size: body.len() as u32,
                barrier_type: 0,
            },
            Bytes::copy_from_slice(body),
        )
    }

    #[test]
    fn writes_everything_in_one_batch_when_under_the_limit() {
        let fragments = vec![frag(1, b"aaa"), frag(2, b"bb")];
        let mut out = Vec::new();
        let stats = OutputStats::default();
        write_batch(&mut out, &fragments, DEFAULT_MAX_WRITE, &stats).unwrap();

        assert_eq!(stats.writes.load(Ordering::SeqCst), 1);
        assert_eq!(stats.fragments_written.load(Ordering::SeqCst), 2);
        assert_eq!(out.len(), fragments.iter().map(Fragment::wire_len).sum::<usize>());
    }

    #[test]
    fn splits_into_multiple_writes_once_the_max_is_exceeded() {
        let fragments = vec![frag(1, &[0u8; 10]), frag(2, &[0u8; 10]), frag(3, &[0u8; 10])];
        let mut out = Vec::new();
        let stats = OutputStats::default();
        // Each fragment is HEADER_SIZE + 10 = 30 bytes; cap at 40 forces a
        // split after the first fragment (30 + 30 > 40).
        write_batch(&mut out, &fragments, 40, &stats).unwrap();

        assert_eq!(stats.writes.load(Ordering::SeqCst), 3);
        assert_eq!(stats.fragments_written.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn a_fragment_larger_than_max_write_is_still_written_alone() {
        let fragments = vec![frag(1, &[0u8; 5000])];
        let mut out = Vec::new();
        let stats = OutputStats::default();
        write_batch(&mut out, &fragments, 100, &stats).unwrap();
        assert_eq!(stats.writes.load(Ordering::SeqCst), 1);
        assert_eq!(out.len(), HEADER_SIZE + 5000);
    }

    #[test]
    fn output_bytes_round_trip_through_evb_wire_decode() {
        let fragments = vec![frag(7, b"payload")];
        let mut out = Vec::new();
        let stats = OutputStats::default();
        write_batch(&mut out, &fragments, DEFAULT_MAX_WRITE, &stats).unwrap();

        let (decoded, rest) = evb_wire::decode_one(&out).unwrap();
        assert_eq!(decoded, fragments[0]);
        assert!(rest.is_empty());
    }
}
