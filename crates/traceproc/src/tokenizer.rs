//! Splits the raw trace stream into packets.

use std::io::Read;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};

use crate::packet::COMPRESSED_PACKETS;
use crate::reader::{decode_varint_prefix, ProtoReader, VarintPrefix};
use crate::stats::{StatKey, Stats};
use crate::types::{RawRecord, TraceError};

/// Tag of a length-delimited field 1, i.e. one packet of the trace message.
const PACKET_TAG: u8 = 0x0A;

/// Packets larger than this are treated as corruption rather than buffered.
pub const MAX_PACKET_SIZE: u64 = 256 << 20;

/// Compressed containers may hold further compressed containers, up to this depth.
pub const MAX_COMPRESSION_DEPTH: usize = 4;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Incremental packet tokenizer.
///
/// Chunks are parsed in place: packets that lie entirely inside one chunk are
/// handed out as slices of it. Only a packet straddling a chunk boundary is
/// copied, into `partial`, and only once it is complete.
#[derive(Debug)]
pub struct Tokenizer {
    partial: BytesMut,
    stats: Arc<Stats>,
    depth: usize,
}

impl Tokenizer {
    pub fn new(stats: Arc<Stats>) -> Self {
        Tokenizer {
            partial: BytesMut::new(),
            stats,
            depth: 0,
        }
    }

    /// Number of bytes buffered for a packet that is not complete yet.
    pub fn pending_bytes(&self) -> usize {
        self.partial.len()
    }

    /// Ends the stream, discarding and returning the size of any incomplete
    /// trailing packet.
    pub fn finish(&mut self) -> usize {
        let pending = self.partial.len();
        self.partial.clear();
        pending
    }

    /// Tokenizes `chunk`, calling `cb` once per complete packet in stream order.
    ///
    /// Compressed containers are expanded before `cb` sees anything from them,
    /// so `cb` never receives a packet carrying compressed packets.
    pub fn tokenize<F>(&mut self, mut chunk: Bytes, cb: &mut F) -> Result<(), TraceError>
    where
        F: FnMut(RawRecord) -> Result<(), TraceError>,
    {
        if !self.partial.is_empty() {
            match self.complete_partial(&mut chunk)? {
                Some(packet) => self.on_packet(packet, cb)?,
                None => return Ok(()),
            }
        }

        while let Some((header_len, size)) = parse_header(&chunk)? {
            let end = header_len + size;
            if chunk.len() < end {
                break;
            }
            let packet = chunk.slice(header_len..end);
            chunk.advance(end);
            self.on_packet(packet, cb)?;
        }

        if !chunk.is_empty() {
            self.partial.extend_from_slice(&chunk);
        }
        Ok(())
    }

    /// Feeds `chunk` into the buffered partial packet. Returns the packet once
    /// it is complete; otherwise all of `chunk` has been absorbed.
    fn complete_partial(&mut self, chunk: &mut Bytes) -> Result<Option<Bytes>, TraceError> {
        // Grow the header a byte at a time so nothing past it is copied
        // before the packet size is known.
        let (header_len, size) = loop {
            if let Some(header) = parse_header(&self.partial)? {
                break header;
            }
            if chunk.is_empty() {
                return Ok(None);
            }
            self.partial.extend_from_slice(&chunk[..1]);
            chunk.advance(1);
        };

        let total = header_len + size;
        let take = total.saturating_sub(self.partial.len()).min(chunk.len());
        self.partial.extend_from_slice(&chunk[..take]);
        chunk.advance(take);
        if self.partial.len() < total {
            return Ok(None);
        }
        Ok(Some(self.partial.split().freeze().slice(header_len..)))
    }

    fn on_packet<F>(&mut self, packet: Bytes, cb: &mut F) -> Result<(), TraceError>
    where
        F: FnMut(RawRecord) -> Result<(), TraceError>,
    {
        match compressed_payload(&packet) {
            Some(payload) => self.tokenize_compressed(&payload, cb),
            None => cb(RawRecord::new(packet)),
        }
    }

    fn tokenize_compressed<F>(&mut self, payload: &[u8], cb: &mut F) -> Result<(), TraceError>
    where
        F: FnMut(RawRecord) -> Result<(), TraceError>,
    {
        if self.depth >= MAX_COMPRESSION_DEPTH {
            return Err(TraceError::CompressionNestingTooDeep(MAX_COMPRESSION_DEPTH));
        }
        self.stats.increment(StatKey::CompressedContainers);

        let data = inflate(payload)?;
        let mut inner = Tokenizer {
            partial: BytesMut::new(),
            stats: self.stats.clone(),
            depth: self.depth + 1,
        };
        inner.tokenize(Bytes::from(data), cb)?;
        match inner.pending_bytes() {
            0 => Ok(()),
            pending => Err(TraceError::TruncatedCompressedPackets(pending)),
        }
    }
}

/// Parses a packet preamble: the field tag and the varint payload size.
///
/// Returns the header length and payload size, or `None` if `data` does not
/// hold a complete header yet.
fn parse_header(data: &[u8]) -> Result<Option<(usize, usize)>, TraceError> {
    let Some(&tag) = data.first() else {
        return Ok(None);
    };
    if tag != PACKET_TAG {
        return Err(TraceError::InvalidPreamble(tag as u64));
    }
    match decode_varint_prefix(&data[1..]) {
        VarintPrefix::Complete(size, n) => {
            if size > MAX_PACKET_SIZE {
                return Err(TraceError::PacketTooLarge(size));
            }
            Ok(Some((1 + n, size as usize)))
        }
        VarintPrefix::Incomplete => Ok(None),
        VarintPrefix::Invalid => Err(TraceError::MalformedVarint),
    }
}

/// The `compressed_packets` payload of `packet`, if it has one.
///
/// Structural problems are left to the decoder, which rejects the packet.
fn compressed_payload(packet: &Bytes) -> Option<Bytes> {
    let mut r = ProtoReader::new(packet);
    let field = r.find_field(COMPRESSED_PACKETS)?;
    field.as_bytes().cloned()
}

/// Upper bound on the output buffer reserved before inflating.
const INFLATE_CAPACITY_HINT: usize = 1 << 20;

/// Inflates a zlib or gzip stream.
fn inflate(payload: &[u8]) -> Result<Vec<u8>, TraceError> {
    let mut out = Vec::with_capacity(inflate_capacity(payload.len()));
    let res = if payload.starts_with(&GZIP_MAGIC) {
        flate2::read::GzDecoder::new(payload).read_to_end(&mut out)
    } else {
        flate2::read::ZlibDecoder::new(payload).read_to_end(&mut out)
    };
    res.map_err(TraceError::Decompression)?;
    Ok(out)
}

fn inflate_capacity(compressed_len: usize) -> usize {
    compressed_len.saturating_mul(4).min(INFLATE_CAPACITY_HINT)
}
