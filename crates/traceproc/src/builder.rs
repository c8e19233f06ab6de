//! Writers for synthetic traces in the packet wire format.
//!
//! Used to construct test inputs and fixtures; the output is byte-for-byte what
//! a real trace writer emits for the same fields.

use std::io::Write;

use bytes::{BufMut, Bytes, BytesMut};
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::packet;
use crate::protos;
use crate::types::RawRecord;

const WIRE_TYPE_VARINT: u32 = 0;
const WIRE_TYPE_LENGTH_DELIMITED: u32 = 2;

/// Field id of a packet inside the top-level trace message.
const TRACE_PACKET_FIELD: u32 = 1;

/// Low-level protobuf field encoder.
struct FieldBuffer {
    scratch: [u8; 10],
    buf: BytesMut,
}

impl FieldBuffer {
    fn with_capacity(size: usize) -> Self {
        FieldBuffer {
            scratch: [0; 10],
            buf: BytesMut::with_capacity(size),
        }
    }

    /// Writes a variable-length unsigned integer.
    #[inline]
    fn uvarint(&mut self, mut u: u64) {
        let mut i = 0;
        while u >= 0x80 {
            self.scratch[i] = (u as u8) | 0x80;
            u >>= 7;
            i += 1;
        }
        self.scratch[i] = u as u8;
        i += 1;
        self.buf.extend_from_slice(&self.scratch[..i]);
    }

    #[inline]
    fn tag(&mut self, field_id: u32, wire_type: u32) {
        self.uvarint(((field_id as u64) << 3) | wire_type as u64);
    }

    #[inline]
    fn varint_field(&mut self, field_id: u32, value: u64) {
        self.tag(field_id, WIRE_TYPE_VARINT);
        self.uvarint(value);
    }

    /// Writes a length-delimited field.
    #[inline]
    fn bytes_field(&mut self, field_id: u32, bytes: &[u8]) {
        // 10 bytes is the maximum length of a uvarint.
        self.buf.reserve(20 + bytes.len());
        self.tag(field_id, WIRE_TYPE_LENGTH_DELIMITED);
        self.uvarint(bytes.len() as u64);
        self.buf.put_slice(bytes);
    }

    fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Builds a single trace packet.
pub struct PacketBuilder {
    buf: FieldBuffer,
}

impl Default for PacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketBuilder {
    pub fn new() -> Self {
        PacketBuilder {
            buf: FieldBuffer::with_capacity(64),
        }
    }

    pub fn timestamp(mut self, ts: u64) -> Self {
        self.buf.varint_field(packet::TIMESTAMP, ts);
        self
    }

    pub fn timestamp_clock_id(mut self, clock_id: u32) -> Self {
        self.buf
            .varint_field(packet::TIMESTAMP_CLOCK_ID, clock_id as u64);
        self
    }

    pub fn sequence_id(mut self, seq_id: u32) -> Self {
        self.buf
            .varint_field(packet::TRUSTED_PACKET_SEQUENCE_ID, seq_id as u64);
        self
    }

    pub fn sequence_flags(mut self, flags: u32) -> Self {
        self.buf.varint_field(packet::SEQUENCE_FLAGS, flags as u64);
        self
    }

    pub fn incremental_state_cleared(mut self) -> Self {
        self.buf.varint_field(packet::INCREMENTAL_STATE_CLEARED, 1);
        self
    }

    pub fn previous_packet_dropped(mut self) -> Self {
        self.buf.varint_field(packet::PREVIOUS_PACKET_DROPPED, 1);
        self
    }

    pub fn defaults(mut self, defaults: &protos::TracePacketDefaults) -> Self {
        let encoded = prost::Message::encode_to_vec(defaults);
        self.buf.bytes_field(packet::TRACE_PACKET_DEFAULTS, &encoded);
        self
    }

    /// Adds an interned data message with one entry per `(field_id, iid, payload)`.
    /// `payload` is appended after the iid field of each entry.
    pub fn interned_data(mut self, entries: &[(u32, u64, &[u8])]) -> Self {
        let mut interned = FieldBuffer::with_capacity(32);
        for (field_id, iid, payload) in entries {
            let mut entry = FieldBuffer::with_capacity(16 + payload.len());
            entry.varint_field(1, *iid);
            entry.buf.put_slice(payload);
            interned.bytes_field(*field_id, &entry.freeze());
        }
        self.buf
            .bytes_field(packet::INTERNED_DATA, &interned.freeze());
        self
    }

    pub fn clock_snapshot(mut self, snapshot: &protos::ClockSnapshot) -> Self {
        let encoded = prost::Message::encode_to_vec(snapshot);
        self.buf.bytes_field(packet::CLOCK_SNAPSHOT, &encoded);
        self
    }

    pub fn service_event(mut self, event: &protos::TracingServiceEvent) -> Self {
        let encoded = prost::Message::encode_to_vec(event);
        self.buf.bytes_field(packet::SERVICE_EVENT, &encoded);
        self
    }

    pub fn trace_config(mut self, config: &protos::TraceConfig) -> Self {
        let encoded = prost::Message::encode_to_vec(config);
        self.buf.bytes_field(packet::TRACE_CONFIG, &encoded);
        self
    }

    pub fn extension_descriptor(mut self, descriptor: &protos::ExtensionDescriptor) -> Self {
        let encoded = prost::Message::encode_to_vec(descriptor);
        self.buf
            .bytes_field(packet::EXTENSION_DESCRIPTOR, &encoded);
        self
    }

    /// Adds an arbitrary length-delimited field, e.g. a payload for a field handler.
    pub fn bytes_field(mut self, field_id: u32, bytes: &[u8]) -> Self {
        self.buf.bytes_field(field_id, bytes);
        self
    }

    /// Adds an arbitrary varint field.
    pub fn varint_field(mut self, field_id: u32, value: u64) -> Self {
        self.buf.varint_field(field_id, value);
        self
    }

    pub fn build(self) -> RawRecord {
        RawRecord::new(self.buf.freeze())
    }
}

/// Builds a complete trace: a sequence of length-delimited packets.
pub struct TraceBuilder {
    buf: FieldBuffer,
}

impl Default for TraceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceBuilder {
    pub fn new() -> Self {
        TraceBuilder {
            buf: FieldBuffer::with_capacity(1024),
        }
    }

    pub fn packet(mut self, packet: PacketBuilder) -> Self {
        self.buf
            .bytes_field(TRACE_PACKET_FIELD, &packet.build());
        self
    }

    pub fn raw_packet(mut self, packet: &[u8]) -> Self {
        self.buf.bytes_field(TRACE_PACKET_FIELD, packet);
        self
    }

    /// Adds a single packet whose `compressed_packets` field holds `inner`,
    /// zlib-deflated.
    pub fn compressed(self, inner: TraceBuilder) -> Self {
        let compressed = zlib_compress(&inner.build());
        self.packet(PacketBuilder::new().bytes_field(packet::COMPRESSED_PACKETS, &compressed))
    }

    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Deflates `data` with a zlib header, the way trace writers compress packets.
pub fn zlib_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    // Writes into a Vec cannot fail.
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}
