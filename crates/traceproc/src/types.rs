use std::num::NonZeroU32;
use std::ops::{Deref, RangeBounds};

use bytes::Bytes;

// === Error types ===

/// Fatal errors that abort ingestion of the input they were raised for.
///
/// Recoverable problems with individual records never surface here; they are
/// counted in [`crate::stats::Stats`] instead.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("unexpected tag 0x{0:02x} in trace stream, expected a packet field")]
    InvalidPreamble(u64),

    #[error("malformed varint in packet preamble")]
    MalformedVarint,

    #[error("packet of {0} bytes exceeds the maximum packet size")]
    PacketTooLarge(u64),

    #[error("failed to parse packet fully; the trace is probably corrupt")]
    MalformedPacket,

    #[error("failed to decompress compressed packets: {0}")]
    Decompression(#[source] std::io::Error),

    #[error("compressed packets are truncated ({0} bytes left over)")]
    TruncatedCompressedPackets(usize),

    #[error("compressed packets nested more than {0} levels deep")]
    CompressionNestingTooDeep(usize),

    #[error("internal invariant violated: {0}")]
    Internal(&'static str),

    #[error("field handler failed on field {field_id}: {message}")]
    Handler { field_id: u32, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session aborted by an earlier error")]
    Aborted,
}

// === Basic types ===

/// Identifies one writer sequence. Zero is reserved and never a valid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceId(NonZeroU32);

impl SequenceId {
    /// Returns `None` for the reserved id 0.
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(SequenceId)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl std::fmt::Display for SequenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A borrowed view into a reference-counted input buffer.
///
/// Cloning and slicing never copy the underlying bytes, so a record can
/// outlive the `parse` call that produced it for as long as anyone holds it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRecord {
    data: Bytes,
}

impl RawRecord {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Re-slices the record relative to its own start.
    pub fn slice(&self, range: impl RangeBounds<usize>) -> RawRecord {
        RawRecord {
            data: self.data.slice(range),
        }
    }

    /// Returns the sub-record covering `subset`, which must point into this record.
    pub fn slice_ref(&self, subset: &[u8]) -> RawRecord {
        RawRecord {
            data: self.data.slice_ref(subset),
        }
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl Deref for RawRecord {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Bytes> for RawRecord {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<Vec<u8>> for RawRecord {
    fn from(data: Vec<u8>) -> Self {
        Self::new(Bytes::from(data))
    }
}
