use bytes::Bytes;

const WIRE_TYPE_VARINT: u64 = 0;
const WIRE_TYPE_FIXED64: u64 = 1;
const WIRE_TYPE_LENGTH_DELIMITED: u64 = 2;
const WIRE_TYPE_FIXED32: u64 = 5;

/// Maximum encoded length of a 64-bit varint.
pub(crate) const MAX_VARINT_LEN: usize = 10;

/// The payload of a single protobuf field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Varint(u64),
    Fixed64(u64),
    Fixed32(u32),
    /// Length-delimited payload, sliced out of the input without copying.
    Bytes(Bytes),
}

/// A decoded field: its id and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub id: u32,
    pub value: FieldValue,
}

impl Field {
    /// Integer value of a varint or fixed-width field.
    pub fn as_u64(&self) -> Option<u64> {
        match self.value {
            FieldValue::Varint(v) | FieldValue::Fixed64(v) => Some(v),
            FieldValue::Fixed32(v) => Some(v as u64),
            FieldValue::Bytes(_) => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_u64().map(|v| v as u32)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_u64().map(|v| v != 0)
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.value {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// A cursor-based reader over protobuf-encoded bytes.
///
/// Uses "sticky error" semantics: once an error occurs, all subsequent reads
/// return zero/default values and [`ProtoReader::next_field`] returns `None`.
/// The error is checked after parsing completes.
pub struct ProtoReader<'a> {
    data: &'a Bytes,
    pos: usize,
    err: bool,
}

impl<'a> ProtoReader<'a> {
    pub fn new(data: &'a Bytes) -> Self {
        Self {
            data,
            pos: 0,
            err: false,
        }
    }

    pub fn has_error(&self) -> bool {
        self.err
    }

    /// Number of bytes not yet consumed. Non-zero after `next_field` returns
    /// `None` means the input was malformed.
    pub fn bytes_left(&self) -> usize {
        self.data.len() - self.pos
    }

    fn set_err(&mut self) {
        self.err = true;
    }

    fn ensure(&mut self, n: usize) -> bool {
        if self.err || self.pos + n > self.data.len() {
            self.set_err();
            false
        } else {
            true
        }
    }

    /// Read a single byte.
    pub fn byte(&mut self) -> u8 {
        if !self.ensure(1) {
            return 0;
        }
        let b = self.data[self.pos];
        self.pos += 1;
        b
    }

    /// Read a variable-length unsigned integer.
    pub fn uvarint(&mut self) -> u64 {
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let b = self.byte();
            if self.err {
                return 0;
            }
            result |= ((b & 0x7F) as u64) << shift;
            if b & 0x80 == 0 {
                return result;
            }
            shift += 7;
            if shift >= 64 {
                self.set_err();
                return 0;
            }
        }
    }

    /// Read a little-endian u32.
    pub fn fixed32(&mut self) -> u32 {
        if !self.ensure(4) {
            return 0;
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;
        u32::from_le_bytes(buf)
    }

    /// Read a little-endian u64.
    pub fn fixed64(&mut self) -> u64 {
        if !self.ensure(8) {
            return 0;
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[self.pos..self.pos + 8]);
        self.pos += 8;
        u64::from_le_bytes(buf)
    }

    /// Slice the next n bytes out of the input without copying.
    pub fn bytes(&mut self, n: usize) -> Bytes {
        if !self.ensure(n) {
            return Bytes::new();
        }
        let start = self.pos;
        self.pos += n;
        self.data.slice(start..self.pos)
    }

    /// Read the next field, or `None` at the end of input or on error.
    pub fn next_field(&mut self) -> Option<Field> {
        if self.err || self.pos >= self.data.len() {
            return None;
        }

        let key = self.uvarint();
        let id = key >> 3;
        if self.err || id == 0 || id > u32::MAX as u64 {
            self.set_err();
            return None;
        }

        let value = match key & 0x7 {
            WIRE_TYPE_VARINT => FieldValue::Varint(self.uvarint()),
            WIRE_TYPE_FIXED64 => FieldValue::Fixed64(self.fixed64()),
            WIRE_TYPE_FIXED32 => FieldValue::Fixed32(self.fixed32()),
            WIRE_TYPE_LENGTH_DELIMITED => {
                let len = self.uvarint();
                if len > self.bytes_left() as u64 {
                    self.set_err();
                    return None;
                }
                FieldValue::Bytes(self.bytes(len as usize))
            }
            // Groups are deprecated and never emitted by trace writers.
            _ => {
                self.set_err();
                return None;
            }
        };

        if self.err {
            return None;
        }
        Some(Field {
            id: id as u32,
            value,
        })
    }

    /// Returns the first occurrence of `id`, scanning from the current position.
    pub fn find_field(&mut self, id: u32) -> Option<Field> {
        while let Some(field) = self.next_field() {
            if field.id == id {
                return Some(field);
            }
        }
        None
    }
}

/// Result of decoding a varint from the start of a possibly incomplete buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VarintPrefix {
    /// The decoded value and the number of bytes it occupied.
    Complete(u64, usize),
    /// More input is needed.
    Incomplete,
    /// The varint is longer than 10 bytes.
    Invalid,
}

pub(crate) fn decode_varint_prefix(data: &[u8]) -> VarintPrefix {
    let mut result: u64 = 0;
    for (i, &b) in data.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return VarintPrefix::Invalid;
        }
        result |= ((b & 0x7F) as u64) << (7 * i as u32);
        if b & 0x80 == 0 {
            return VarintPrefix::Complete(result, i + 1);
        }
    }
    if data.len() >= MAX_VARINT_LEN {
        VarintPrefix::Invalid
    } else {
        VarintPrefix::Incomplete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_uvarint() {
        let data = Bytes::from_static(&[0x00, 0x7F, 0x80, 0x01, 0xAC, 0x02]);
        let mut r = ProtoReader::new(&data);
        assert_eq!(r.uvarint(), 0);
        assert_eq!(r.uvarint(), 127);
        assert_eq!(r.uvarint(), 128);
        assert_eq!(r.uvarint(), 300);
        assert!(!r.has_error());
        assert_eq!(r.bytes_left(), 0);
    }

    #[test]
    fn test_reader_fields() {
        // field 1 varint 150, field 2 "hi", field 3 fixed32 7, field 4 fixed64 9
        let mut data = vec![0x08, 0x96, 0x01, 0x12, 0x02, b'h', b'i', 0x1D];
        data.extend_from_slice(&7u32.to_le_bytes());
        data.push(0x21);
        data.extend_from_slice(&9u64.to_le_bytes());
        let data = Bytes::from(data);

        let mut r = ProtoReader::new(&data);
        let f = r.next_field().unwrap();
        assert_eq!((f.id, f.as_u64()), (1, Some(150)));
        let f = r.next_field().unwrap();
        assert_eq!(f.id, 2);
        assert_eq!(f.as_bytes().map(|b| &b[..]), Some(&b"hi"[..]));
        let f = r.next_field().unwrap();
        assert_eq!(f.value, FieldValue::Fixed32(7));
        let f = r.next_field().unwrap();
        assert_eq!(f.value, FieldValue::Fixed64(9));
        assert!(r.next_field().is_none());
        assert!(!r.has_error());
    }

    #[test]
    fn test_length_delimited_is_zero_copy() {
        let data = Bytes::from_static(&[0x12, 0x03, 1, 2, 3]);
        let mut r = ProtoReader::new(&data);
        let f = r.next_field().unwrap();
        let payload = f.as_bytes().unwrap();
        assert_eq!(payload.as_ptr(), data[2..].as_ptr());
    }

    #[test]
    fn test_sticky_error_on_truncated_payload() {
        // field 2, length 5 but only 2 bytes follow
        let data = Bytes::from_static(&[0x12, 0x05, 1, 2]);
        let mut r = ProtoReader::new(&data);
        assert!(r.next_field().is_none());
        assert!(r.has_error());
        assert_eq!(r.uvarint(), 0);
        assert!(r.next_field().is_none());
    }

    #[test]
    fn test_groups_are_rejected() {
        let data = Bytes::from_static(&[0x0B, 0x0C]);
        let mut r = ProtoReader::new(&data);
        assert!(r.next_field().is_none());
        assert!(r.has_error());
    }

    #[test]
    fn test_find_field() {
        let data = Bytes::from_static(&[0x08, 0x01, 0x10, 0x02, 0x18, 0x03]);
        let mut r = ProtoReader::new(&data);
        assert_eq!(r.find_field(2).and_then(|f| f.as_u64()), Some(2));
        assert!(r.find_field(1).is_none());
    }

    #[test]
    fn test_decode_varint_prefix() {
        assert_eq!(decode_varint_prefix(&[0x05]), VarintPrefix::Complete(5, 1));
        assert_eq!(
            decode_varint_prefix(&[0xAC, 0x02, 0xFF]),
            VarintPrefix::Complete(300, 2)
        );
        assert_eq!(decode_varint_prefix(&[0x80]), VarintPrefix::Incomplete);
        assert_eq!(decode_varint_prefix(&[]), VarintPrefix::Incomplete);
        assert_eq!(decode_varint_prefix(&[0xFF; 11]), VarintPrefix::Invalid);
    }
}
