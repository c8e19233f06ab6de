use bytes::Bytes;

use crate::reader::{Field, ProtoReader};
use crate::types::{RawRecord, TraceError};

// Trace packet field ids (wire format).
pub const CLOCK_SNAPSHOT: u32 = 6;
pub const TIMESTAMP: u32 = 8;
pub const TRUSTED_PACKET_SEQUENCE_ID: u32 = 10;
pub const INTERNED_DATA: u32 = 12;
pub const SEQUENCE_FLAGS: u32 = 13;
pub const TRACE_CONFIG: u32 = 33;
pub const INCREMENTAL_STATE_CLEARED: u32 = 41;
pub const PREVIOUS_PACKET_DROPPED: u32 = 42;
pub const SERVICE_EVENT: u32 = 47;
pub const COMPRESSED_PACKETS: u32 = 50;
pub const TIMESTAMP_CLOCK_ID: u32 = 58;
pub const TRACE_PACKET_DEFAULTS: u32 = 59;
pub const EXTENSION_DESCRIPTOR: u32 = 72;

// Sequence flag bits.
pub const SEQ_INCREMENTAL_STATE_CLEARED: u32 = 1;
pub const SEQ_NEEDS_INCREMENTAL_STATE: u32 = 2;

/// A decoded view over one trace packet.
///
/// Every field is kept as a zero-copy slice of the packet so field handlers
/// can look at the fields they own without decoding the packet again.
#[derive(Debug, Clone)]
pub struct PacketView {
    raw: RawRecord,
    fields: Vec<Field>,
}

impl PacketView {
    /// Decodes the top-level fields of `raw`. Fails if the packet is not
    /// valid protobuf all the way to its end.
    pub fn decode(raw: RawRecord) -> Result<Self, TraceError> {
        let mut fields = Vec::new();
        {
            let data = raw.as_bytes();
            let mut r = ProtoReader::new(data);
            while let Some(field) = r.next_field() {
                fields.push(field);
            }
            if r.has_error() || r.bytes_left() > 0 {
                return Err(TraceError::MalformedPacket);
            }
        }
        Ok(Self { raw, fields })
    }

    pub fn raw(&self) -> &RawRecord {
        &self.raw
    }

    pub fn into_raw(self) -> RawRecord {
        self.raw
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn has_field(&self, id: u32) -> bool {
        self.fields.iter().any(|f| f.id == id)
    }

    /// The last occurrence of a singular field, matching protobuf merge semantics.
    pub fn field(&self, id: u32) -> Option<&Field> {
        self.fields.iter().rev().find(|f| f.id == id)
    }

    /// All occurrences of a repeated field, in encoding order.
    pub fn repeated(&self, id: u32) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(move |f| f.id == id)
    }

    fn bytes_field(&self, id: u32) -> Option<&Bytes> {
        self.field(id).and_then(Field::as_bytes)
    }

    fn bool_field(&self, id: u32) -> bool {
        self.field(id).and_then(Field::as_bool).unwrap_or(false)
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.field(TIMESTAMP).and_then(Field::as_u64)
    }

    pub fn timestamp_clock_id(&self) -> Option<u32> {
        self.field(TIMESTAMP_CLOCK_ID).and_then(Field::as_u32)
    }

    /// Raw sequence id as written; zero when the writer did not set one.
    pub fn trusted_packet_sequence_id(&self) -> u32 {
        self.field(TRUSTED_PACKET_SEQUENCE_ID)
            .and_then(Field::as_u32)
            .unwrap_or(0)
    }

    pub fn sequence_flags(&self) -> u32 {
        self.field(SEQUENCE_FLAGS)
            .and_then(Field::as_u32)
            .unwrap_or(0)
    }

    pub fn incremental_state_cleared(&self) -> bool {
        self.bool_field(INCREMENTAL_STATE_CLEARED)
            || self.sequence_flags() & SEQ_INCREMENTAL_STATE_CLEARED != 0
    }

    pub fn needs_incremental_state(&self) -> bool {
        self.sequence_flags() & SEQ_NEEDS_INCREMENTAL_STATE != 0
    }

    pub fn previous_packet_dropped(&self) -> bool {
        self.bool_field(PREVIOUS_PACKET_DROPPED)
    }

    /// Returns a field's payload as a record sharing this packet's buffer.
    pub fn sub_record(&self, id: u32) -> Option<RawRecord> {
        self.bytes_field(id).map(|b| RawRecord::new(b.clone()))
    }

    pub fn trace_packet_defaults(&self) -> Option<RawRecord> {
        self.sub_record(TRACE_PACKET_DEFAULTS)
    }

    pub fn interned_data(&self) -> Option<RawRecord> {
        self.sub_record(INTERNED_DATA)
    }

    pub fn clock_snapshot(&self) -> Option<&Bytes> {
        self.bytes_field(CLOCK_SNAPSHOT)
    }

    pub fn service_event(&self) -> Option<&Bytes> {
        self.bytes_field(SERVICE_EVENT)
    }

    pub fn extension_descriptor(&self) -> Option<&Bytes> {
        self.bytes_field(EXTENSION_DESCRIPTOR)
    }

    pub fn trace_config(&self) -> Option<&Bytes> {
        self.bytes_field(TRACE_CONFIG)
    }

    pub fn has_compressed_packets(&self) -> bool {
        self.has_field(COMPRESSED_PACKETS)
    }
}
