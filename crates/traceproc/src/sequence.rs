//! Per-sequence incremental state: packet defaults and interned data.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;

use crate::protos::TracePacketDefaults;
use crate::reader::ProtoReader;
use crate::stats::{StatKey, Stats};
use crate::types::{RawRecord, SequenceId};

/// Field id of the handle inside every interned entry.
const INTERNED_IID_FIELD: u32 = 1;

/// One interned message, addressed by `(field_id, iid)` within its generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternedEntry {
    pub field_id: u32,
    pub iid: u64,
    pub blob: RawRecord,
}

/// Decoded packet defaults together with the bytes they were decoded from.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketDefaults {
    pub decoded: TracePacketDefaults,
    pub raw: RawRecord,
}

/// Interned entries of one generation, in the order they were added.
///
/// Entries are only ever appended, so a position below a reader's watermark
/// stays valid for the lifetime of the table.
#[derive(Debug, Default)]
struct InternTable {
    entries: Vec<InternedEntry>,
    by_handle: HashMap<(u32, u64), usize>,
}

/// One sequence's defaults and interning table, as visible to a reader.
///
/// The live generation and every packet decoded from it share one table.
/// Each handle only sees the entries that existed when it was cloned, so a
/// packet never observes defaults or interned entries added after it.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    index: u32,
    defaults: Option<Arc<PacketDefaults>>,
    interned: Arc<RwLock<InternTable>>,
    /// Number of table entries visible through this handle.
    visible: usize,
}

impl Generation {
    fn new(index: u32) -> Self {
        Generation {
            index,
            ..Default::default()
        }
    }

    /// Position of this generation in its sequence, starting at 0.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn defaults(&self) -> Option<&PacketDefaults> {
        self.defaults.as_deref()
    }

    /// The default clock id for packets without an explicit one.
    pub fn default_clock_id(&self) -> Option<u32> {
        self.defaults
            .as_ref()
            .and_then(|d| d.decoded.timestamp_clock_id)
    }

    pub fn lookup(&self, field_id: u32, iid: u64) -> Option<InternedEntry> {
        let table = self.interned.read().unwrap_or_else(PoisonError::into_inner);
        let pos = *table.by_handle.get(&(field_id, iid))?;
        (pos < self.visible).then(|| table.entries[pos].clone())
    }

    pub fn interned_count(&self) -> usize {
        self.visible
    }
}

/// Why an interned message could not be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternError {
    /// The entry has no non-zero iid field.
    MissingIid,
    /// The entry is not valid protobuf.
    Malformed,
}

/// The incremental state of one writer sequence.
#[derive(Debug)]
pub struct SequenceState {
    seq_id: Option<SequenceId>,
    current: Generation,
    /// Number of generations created so far.
    generations: u32,
    packet_loss: bool,
}

impl SequenceState {
    /// State for a freshly seen sequence.
    ///
    /// It starts out invalid: packets needing incremental state are skipped
    /// until the writer announces a clear, since whatever it interned before
    /// may have been lost.
    pub fn new(seq_id: Option<SequenceId>) -> Self {
        SequenceState {
            seq_id,
            current: Generation::new(0),
            generations: 1,
            packet_loss: true,
        }
    }

    pub fn seq_id(&self) -> Option<SequenceId> {
        self.seq_id
    }

    pub fn is_incremental_state_valid(&self) -> bool {
        !self.packet_loss
    }

    pub fn current_generation(&self) -> &Generation {
        &self.current
    }

    /// Starts a new, empty generation and marks the state valid again.
    pub fn on_incremental_state_cleared(&mut self) {
        self.packet_loss = false;
        self.current = Generation::new(self.generations);
        self.generations += 1;
    }

    /// Invalidates the current generation until the next clear.
    pub fn on_packet_loss(&mut self) {
        self.packet_loss = true;
    }

    /// Replaces the defaults of the current generation.
    pub fn update_defaults(&mut self, raw: RawRecord) -> Result<(), prost::DecodeError> {
        let decoded = <TracePacketDefaults as prost::Message>::decode(raw.as_bytes().clone())?;
        self.current.defaults = Some(Arc::new(PacketDefaults { decoded, raw }));
        Ok(())
    }

    /// Stores one interned message in the current generation.
    ///
    /// Re-interning an existing handle keeps the first entry.
    pub fn intern_message(&mut self, field_id: u32, blob: RawRecord) -> Result<(), InternError> {
        let iid = {
            let data: &Bytes = blob.as_bytes();
            let mut r = ProtoReader::new(data);
            let iid = r.find_field(INTERNED_IID_FIELD).and_then(|f| f.as_u64());
            if r.has_error() {
                return Err(InternError::Malformed);
            }
            match iid {
                Some(iid) if iid != 0 => iid,
                _ => return Err(InternError::MissingIid),
            }
        };

        let mut table = self
            .current
            .interned
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(&pos) = table.by_handle.get(&(field_id, iid)) {
            if table.entries[pos].blob != blob {
                log::debug!(
                    "interned entry {iid} of field {field_id} re-interned with different contents"
                );
            }
            return Ok(());
        }
        let pos = table.entries.len();
        table.by_handle.insert((field_id, iid), pos);
        table.entries.push(InternedEntry {
            field_id,
            iid,
            blob,
        });
        drop(table);
        self.current.visible = pos + 1;
        Ok(())
    }

    /// Captures the state a packet decoded right now is bound to.
    pub fn context(&self, stats: &Arc<Stats>) -> SequenceContext {
        SequenceContext {
            seq_id: self.seq_id,
            generation: self.current.clone(),
            stats: stats.clone(),
        }
    }
}

/// Arena of sequence states, created lazily on first reference.
///
/// Packets without a sequence id share one state.
#[derive(Debug)]
pub struct SequenceStates {
    unsequenced: SequenceState,
    by_id: HashMap<SequenceId, SequenceState>,
}

impl Default for SequenceStates {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceStates {
    pub fn new() -> Self {
        SequenceStates {
            unsequenced: SequenceState::new(None),
            by_id: HashMap::new(),
        }
    }

    pub fn get_or_create(&mut self, seq_id: Option<SequenceId>) -> &mut SequenceState {
        match seq_id {
            Some(id) => self
                .by_id
                .entry(id)
                .or_insert_with(|| SequenceState::new(Some(id))),
            None => &mut self.unsequenced,
        }
    }

    pub fn get(&self, seq_id: SequenceId) -> Option<&SequenceState> {
        self.by_id.get(&seq_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// The sequence a decoded packet belongs to, as of its decode time.
#[derive(Debug, Clone)]
pub struct SequenceContext {
    seq_id: Option<SequenceId>,
    generation: Generation,
    stats: Arc<Stats>,
}

impl SequenceContext {
    pub fn seq_id(&self) -> Option<SequenceId> {
        self.seq_id
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    /// Looks up an interned entry in the packet's own generation.
    ///
    /// A miss counts an `interned_data_errors`: either the writer referenced
    /// a handle it never interned, or it was interned in an earlier
    /// generation that has since been cleared.
    pub fn lookup_interned(&self, field_id: u32, iid: u64) -> Option<InternedEntry> {
        let entry = self.generation.lookup(field_id, iid);
        if entry.is_none() {
            self.stats.increment(StatKey::InternedDataErrors);
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PacketBuilder;
    use crate::packet::PacketView;

    fn entry(iid: u64, payload: &[u8]) -> RawRecord {
        let mut bytes = vec![0x08];
        bytes.push(iid as u8);
        bytes.extend_from_slice(payload);
        RawRecord::from(bytes)
    }

    fn valid_state(id: u32) -> SequenceState {
        let mut state = SequenceState::new(SequenceId::new(id));
        state.on_incremental_state_cleared();
        state
    }

    #[test]
    fn test_new_state_is_invalid_until_cleared() {
        let mut state = SequenceState::new(SequenceId::new(1));
        assert!(!state.is_incremental_state_valid());
        state.on_incremental_state_cleared();
        assert!(state.is_incremental_state_valid());
        state.on_packet_loss();
        assert!(!state.is_incremental_state_valid());
    }

    #[test]
    fn test_clear_starts_new_generation() {
        let mut state = valid_state(1);
        state.intern_message(5, entry(1, b"a")).unwrap();
        assert!(state.current_generation().lookup(5, 1).is_some());

        state.on_incremental_state_cleared();
        state.on_incremental_state_cleared();
        assert_eq!(state.current_generation().index(), 3);
        assert!(state.current_generation().lookup(5, 1).is_none());
    }

    #[test]
    fn test_context_does_not_see_later_interning() {
        let stats = Arc::new(Stats::new());
        let mut state = valid_state(1);
        state.intern_message(5, entry(1, b"a")).unwrap();
        let ctx = state.context(&stats);

        state.intern_message(5, entry(2, b"b")).unwrap();
        assert!(ctx.lookup_interned(5, 1).is_some());
        assert!(ctx.lookup_interned(5, 2).is_none());
        assert_eq!(stats.get(StatKey::InternedDataErrors), 1);
        assert!(state.context(&stats).lookup_interned(5, 2).is_some());
    }

    #[test]
    fn test_buffered_contexts_share_one_table() {
        let stats = Arc::new(Stats::new());
        let mut state = valid_state(1);
        let mut buffered = Vec::new();
        for iid in 1..=5_000u64 {
            let mut blob = vec![0x08];
            prost::encoding::encode_varint(iid, &mut blob);
            state.intern_message(10, RawRecord::from(blob)).unwrap();
            buffered.push(state.context(&stats));
        }

        assert_eq!(state.current_generation().interned_count(), 5_000);
        for (i, ctx) in buffered.iter().enumerate() {
            assert!(Arc::ptr_eq(&ctx.generation.interned, &state.current.interned));
            assert_eq!(ctx.generation().interned_count(), i + 1);
        }
        assert!(buffered[0].lookup_interned(10, 1).is_some());
        assert!(buffered[0].lookup_interned(10, 2).is_none());
        assert!(buffered[4_999].lookup_interned(10, 5_000).is_some());
        assert_eq!(stats.get(StatKey::InternedDataErrors), 1);
    }

    #[test]
    fn test_defaults_are_bound_at_capture() {
        let stats = Arc::new(Stats::new());
        let mut state = valid_state(1);
        let defaults = |clock_id| {
            let packet = PacketBuilder::new()
                .defaults(&TracePacketDefaults {
                    timestamp_clock_id: Some(clock_id),
                })
                .build();
            PacketView::decode(packet)
                .unwrap()
                .trace_packet_defaults()
                .unwrap()
        };
        state.update_defaults(defaults(3)).unwrap();
        let before = state.context(&stats);
        state.update_defaults(defaults(6)).unwrap();

        assert_eq!(before.generation().default_clock_id(), Some(3));
        assert_eq!(state.current_generation().default_clock_id(), Some(6));
    }

    #[test]
    fn test_stale_handle_after_clear_is_rejected() {
        let stats = Arc::new(Stats::new());
        let mut state = valid_state(1);
        state.intern_message(7, entry(9, b"old")).unwrap();
        state.on_incremental_state_cleared();

        assert!(state.context(&stats).lookup_interned(7, 9).is_none());
        assert_eq!(stats.get(StatKey::InternedDataErrors), 1);
    }

    #[test]
    fn test_reinterning_keeps_first_entry() {
        let mut state = valid_state(1);
        state.intern_message(5, entry(1, b"first")).unwrap();
        state.intern_message(5, entry(1, b"second")).unwrap();
        let generation = state.current_generation();
        assert_eq!(generation.interned_count(), 1);
        assert!(generation.lookup(5, 1).unwrap().blob.ends_with(b"first"));
    }

    #[test]
    fn test_intern_without_iid_fails() {
        let mut state = valid_state(1);
        let no_iid = RawRecord::from(vec![0x10, 0x01]);
        assert_eq!(state.intern_message(5, no_iid), Err(InternError::MissingIid));
        let garbage = RawRecord::from(vec![0x0A, 0x09]);
        assert_eq!(state.intern_message(5, garbage), Err(InternError::Malformed));
    }

    #[test]
    fn test_update_defaults() {
        let mut state = valid_state(1);
        let packet = PacketBuilder::new()
            .defaults(&TracePacketDefaults {
                timestamp_clock_id: Some(3),
            })
            .build();
        let view = PacketView::decode(packet).unwrap();
        state.update_defaults(view.trace_packet_defaults().unwrap()).unwrap();
        assert_eq!(state.current_generation().default_clock_id(), Some(3));
    }

    #[test]
    fn test_unsequenced_packets_share_state() {
        let mut states = SequenceStates::new();
        states.get_or_create(None).on_incremental_state_cleared();
        assert!(states.get_or_create(None).is_incremental_state_valid());
        assert!(states.is_empty());

        states.get_or_create(SequenceId::new(4));
        assert_eq!(states.len(), 1);
        assert!(states.get(SequenceId::new(4).unwrap()).is_some());
    }
}
