//! Extension points: per-field handlers run at decode time, and the sink that
//! receives packets once they are sorted.

use std::collections::BTreeMap;

use crate::packet::PacketView;
use crate::sequence::SequenceContext;
use crate::stats::Stats;
use crate::types::{RawRecord, SequenceId, TraceError};

/// What a field handler decided about a packet.
#[derive(Debug)]
pub enum HandlerResult {
    /// The handler does not apply; dispatch continues with the next one.
    NotApplicable,
    /// Stop dispatching and hand the packet to the reordering engine.
    Defer,
    /// The handler consumed the packet; it is not sorted or emitted.
    Consumed,
    /// Abort ingestion.
    Error(String),
}

/// Everything a handler may look at while a packet is being decoded.
pub struct FieldContext<'a> {
    /// The packet's timestamp in trace time.
    pub timestamp: i64,
    pub sequence: &'a SequenceContext,
    pub stats: &'a Stats,
}

/// Decode-time handler for one or more top-level packet fields.
pub trait FieldHandler {
    /// Called once per registered field id present in the packet, in
    /// ascending field id order.
    fn tokenize_field(
        &mut self,
        ctx: &FieldContext<'_>,
        packet: &PacketView,
        field_id: u32,
    ) -> HandlerResult;

    /// Called when `seq_id` announces an incremental state reset.
    fn on_incremental_state_cleared(&mut self, _seq_id: SequenceId) {}
}

/// Handlers keyed by the field ids they registered for.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn FieldHandler>>,
    by_field: BTreeMap<u32, Vec<usize>>,
}

/// Outcome of dispatching one packet to every applicable handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Sort,
    Consumed,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `field_ids`. Handlers sharing a field id run
    /// in registration order.
    pub fn register(&mut self, handler: Box<dyn FieldHandler>, field_ids: &[u32]) {
        let index = self.handlers.len();
        self.handlers.push(handler);
        for field_id in field_ids {
            self.by_field.entry(*field_id).or_default().push(index);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn dispatch(
        &mut self,
        ctx: &FieldContext<'_>,
        packet: &PacketView,
    ) -> Result<Dispatch, TraceError> {
        for (field_id, indices) in &self.by_field {
            if !packet.has_field(*field_id) {
                continue;
            }
            for index in indices {
                match self.handlers[*index].tokenize_field(ctx, packet, *field_id) {
                    HandlerResult::NotApplicable => continue,
                    HandlerResult::Defer => return Ok(Dispatch::Sort),
                    HandlerResult::Consumed => return Ok(Dispatch::Consumed),
                    HandlerResult::Error(message) => {
                        return Err(TraceError::Handler {
                            field_id: *field_id,
                            message,
                        })
                    }
                }
            }
        }
        Ok(Dispatch::Sort)
    }

    pub(crate) fn notify_incremental_state_cleared(&mut self, seq_id: SequenceId) {
        for handler in &mut self.handlers {
            handler.on_incremental_state_cleared(seq_id);
        }
    }
}

/// Downstream consumer of sorted packets.
///
/// `packet` shares the input buffer it was read from; holding on to it keeps
/// that buffer alive without copying.
pub trait PacketSink {
    fn consume(&mut self, ts: i64, sequence: &SequenceContext, packet: RawRecord);
}

impl<F> PacketSink for F
where
    F: FnMut(i64, &SequenceContext, RawRecord),
{
    fn consume(&mut self, ts: i64, sequence: &SequenceContext, packet: RawRecord) {
        self(ts, sequence, packet)
    }
}
