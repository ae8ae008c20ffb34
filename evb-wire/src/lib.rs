//! Flat fragment wire format.
//!
//! A fragment on the wire is a fixed 20 byte header followed by
//! `payload_size` bytes of opaque body. Multiple fragments may be packed
//! back to back in a single block, as delivered by a producer in one
//! `read()`.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Sentinel used by the fragment handler to mark a fragment whose true
/// timestamp could not be determined (e.g. a barrier with no body clock).
pub const NULL_TIMESTAMP: u64 = u64::MAX;

/// Size in bytes of an encoded [`FragmentHeader`].
pub const HEADER_SIZE: usize = 20;

/// Fixed 20 byte little-endian header preceding every fragment body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub timestamp: u64,
    pub source_id: u32,
    pub payload_size: u32,
    pub barrier_type: u32,
}

impl FragmentHeader {
    pub fn is_barrier(&self) -> bool {
        self.barrier_type != 0
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.timestamp);
        buf.put_u32_le(self.source_id);
        buf.put_u32_le(self.payload_size);
        buf.put_u32_le(self.barrier_type);
    }

    fn decode(buf: &mut impl Buf) -> FragmentHeader {
        FragmentHeader {
            timestamp: buf.get_u64_le(),
            source_id: buf.get_u32_le(),
            payload_size: buf.get_u32_le(),
            barrier_type: buf.get_u32_le(),
        }
    }
}

/// A single fragment: header plus its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub header: FragmentHeader,
    pub payload: Bytes,
}

impl Fragment {
    pub fn new(header: FragmentHeader, payload: Bytes) -> Self {
        debug_assert_eq!(header.payload_size as usize, payload.len());
        Fragment { header, payload }
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    pub fn source_id(&self) -> u32 {
        self.header.source_id
    }

    pub fn is_barrier(&self) -> bool {
        self.header.is_barrier()
    }

    /// Total on-wire size of this fragment, header included.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode this fragment onto the end of `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.wire_len());
        self.header.encode(buf);
        buf.put_slice(&self.payload);
    }
}

/// Error returned while decoding a block of packed fragments.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("truncated fragment header: {have} of {HEADER_SIZE} bytes available")]
    TruncatedHeader { have: usize },
    #[error(
        "truncated fragment body: source {source_id} declared {declared} bytes, {have} available"
    )]
    TruncatedBody {
        source_id: u32,
        declared: u32,
        have: usize,
    },
}

impl fmt::Display for FragmentHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FragmentHeader {{ ts: {}, source: {}, size: {}, barrier: {} }}",
            self.timestamp, self.source_id, self.payload_size, self.barrier_type
        )
    }
}

/// Result of parsing a block that may contain a whole number of fragments
/// followed by a truncated trailer (the common case when reading from a
/// stream socket where fragment boundaries don't align with read sizes).
pub struct ParsedBlock {
    /// Fragments fully decoded from the front of the block.
    pub fragments: Vec<Fragment>,
    /// Bytes left over after the last complete fragment: either empty, or
    /// a partial header/body waiting for more data to arrive.
    pub remainder: Bytes,
}

/// Parse as many complete fragments as possible from the front of `block`.
///
/// Unlike a single `decode`, this never errors on a truncated trailing
/// fragment: that's expected at a stream boundary and is returned as
/// `remainder` for the caller to prepend to the next read. It *does* treat
/// a header whose `payload_size` overruns the block as un-parseable for
/// now, which looks identical to a truncated body and is handled the same
/// way (left in `remainder`).
pub fn parse_block(block: &[u8]) -> ParsedBlock {
    let mut fragments = Vec::new();
    let mut offset = 0usize;

    loop {
        let remaining = &block[offset..];
        if remaining.len() < HEADER_SIZE {
            break;
        }
        let mut header_buf = &remaining[..HEADER_SIZE];
        let header = FragmentHeader::decode(&mut header_buf);
        let body_len = header.payload_size as usize;
        if remaining.len() < HEADER_SIZE + body_len {
            break;
        }
        let payload = Bytes::copy_from_slice(&remaining[HEADER_SIZE..HEADER_SIZE + body_len]);
        fragments.push(Fragment::new(header, payload));
        offset += HEADER_SIZE + body_len;
    }

    ParsedBlock {
        fragments,
        remainder: Bytes::copy_from_slice(&block[offset..]),
    }
}

/// Decode exactly one fragment from the front of `buf`, returning an error
/// rather than treating a short read as "come back later". Used where the
/// caller has already guaranteed a complete block (e.g. from disk).
pub fn decode_one(buf: &[u8]) -> Result<(Fragment, &[u8]), WireError> {
    if buf.len() < HEADER_SIZE {
        return Err(WireError::TruncatedHeader { have: buf.len() });
    }
    let mut header_buf = &buf[..HEADER_SIZE];
    let header = FragmentHeader::decode(&mut header_buf);
    let body_len = header.payload_size as usize;
    let rest = &buf[HEADER_SIZE..];
    if rest.len() < body_len {
        return Err(WireError::TruncatedBody {
            source_id: header.source_id,
            declared: header.payload_size,
            have: rest.len(),
        });
    }
    let payload = Bytes::copy_from_slice(&rest[..body_len]);
    Ok((Fragment::new(header, payload), &rest[body_len..]))
}
