//! The record decoder: turns tokenized packets into timestamped events.

use std::sync::Arc;

use bytes::Bytes;
use prost::Message;

use crate::clock::{ClockId, ClockReading, ClockTracker};
use crate::config::SortingMode;
use crate::descriptors::DescriptorPool;
use crate::handler::{Dispatch, FieldContext, FieldHandler, HandlerRegistry, PacketSink};
use crate::metadata::TraceMetadata;
use crate::packet::PacketView;
use crate::protos::{ClockSnapshot, ExtensionDescriptor, TraceConfig, TracingServiceEvent};
use crate::reader::{FieldValue, ProtoReader};
use crate::sequence::{Generation, SequenceStates};
use crate::sorter::{DecodedEvent, Sorter};
use crate::stats::{StatKey, Stats};
use crate::types::{RawRecord, SequenceId, TraceError};

/// Decodes packets against the session's clock and sequence state.
pub struct PacketDecoder {
    clocks: ClockTracker,
    sequences: SequenceStates,
    handlers: HandlerRegistry,
    descriptors: DescriptorPool,
    metadata: TraceMetadata,
    /// Largest timestamp assigned so far.
    latest_timestamp: i64,
    stats: Arc<Stats>,
}

impl PacketDecoder {
    pub fn new(stats: Arc<Stats>) -> Self {
        PacketDecoder {
            clocks: ClockTracker::new(stats.clone()),
            sequences: SequenceStates::new(),
            handlers: HandlerRegistry::new(),
            descriptors: DescriptorPool::new(),
            metadata: TraceMetadata::default(),
            latest_timestamp: 0,
            stats,
        }
    }

    pub fn register_handler(&mut self, handler: Box<dyn FieldHandler>, field_ids: &[u32]) {
        self.handlers.register(handler, field_ids);
    }

    pub fn clock_tracker(&self) -> &ClockTracker {
        &self.clocks
    }

    pub fn sequences(&self) -> &SequenceStates {
        &self.sequences
    }

    pub fn descriptors(&self) -> &DescriptorPool {
        &self.descriptors
    }

    pub fn metadata(&self) -> &TraceMetadata {
        &self.metadata
    }

    pub fn latest_timestamp(&self) -> i64 {
        self.latest_timestamp
    }

    /// Decodes one packet.
    ///
    /// Packets that update decoding state take effect immediately; everything
    /// else is pushed into `sorter`. Record-level problems are counted and the
    /// packet dropped; only structural corruption is returned as an error.
    pub fn decode(
        &mut self,
        raw: RawRecord,
        sorter: &mut Sorter,
        sink: &mut dyn PacketSink,
    ) -> Result<(), TraceError> {
        let packet = PacketView::decode(raw)?;
        if packet.has_compressed_packets() {
            return Err(TraceError::Internal(
                "compressed packets reached the decoder undecompressed",
            ));
        }

        let seq_id = SequenceId::new(packet.trusted_packet_sequence_id());

        if packet.incremental_state_cleared() {
            self.handle_incremental_state_cleared(seq_id);
        } else if packet.previous_packet_dropped() {
            self.handle_previous_packet_dropped(seq_id);
        }

        if let Some(defaults) = packet.trace_packet_defaults() {
            self.parse_trace_packet_defaults(seq_id, defaults);
        }

        if let Some(interned) = packet.interned_data() {
            self.parse_interned_data(seq_id, interned);
        }

        if let Some(snapshot) = packet.clock_snapshot() {
            self.parse_clock_snapshot(seq_id, snapshot);
            return Ok(());
        }

        if let Some(event) = packet.service_event() {
            self.parse_service_event(&packet, seq_id, event, sorter, sink);
            return Ok(());
        }

        if let Some(descriptor) = packet.extension_descriptor() {
            self.parse_extension_descriptor(descriptor);
            return Ok(());
        }

        if packet.needs_incremental_state() {
            let valid = seq_id.is_some_and(|id| {
                self.sequences
                    .get(id)
                    .is_some_and(|state| state.is_incremental_state_valid())
            });
            if !valid {
                log::debug!(
                    "dropping packet needing incremental state on sequence {}",
                    packet.trusted_packet_sequence_id()
                );
                self.stats.increment(StatKey::InternedDataErrors);
                return Ok(());
            }
        }

        let state = self.sequences.get_or_create(seq_id);
        let sequence = state.context(&self.stats);
        let Some(timestamp) =
            self.packet_timestamp(&packet, seq_id, sequence.generation(), sorter)
        else {
            return Ok(());
        };

        let ctx = FieldContext {
            timestamp,
            sequence: &sequence,
            stats: &self.stats,
        };
        if self.handlers.dispatch(&ctx, &packet)? == Dispatch::Consumed {
            return Ok(());
        }

        if let Some(config) = packet.trace_config() {
            self.parse_trace_config(config, sorter);
        }

        sorter.push(
            DecodedEvent {
                ts: timestamp,
                sequence,
                packet: packet.into_raw(),
            },
            sink,
        );
        Ok(())
    }

    /// Resolves the packet timestamp into trace time.
    ///
    /// Returns `None` when the packet must be dropped because its clock cannot
    /// be converted. Packets without a timestamp are placed no earlier than
    /// anything seen so far; this is an approximation, not an ordering
    /// guarantee.
    fn packet_timestamp(
        &mut self,
        packet: &PacketView,
        seq_id: Option<SequenceId>,
        generation: &Generation,
        sorter: &Sorter,
    ) -> Option<i64> {
        let timestamp = match packet.timestamp() {
            Some(raw_ts) => {
                let clock_id = packet
                    .timestamp_clock_id()
                    .or_else(|| generation.default_clock_id())
                    .filter(|id| *id != 0);
                match clock_id {
                    Some(raw_id) => {
                        let clock_id = match ClockId::resolve(seq_id, raw_id) {
                            Ok(clock_id) => clock_id,
                            Err(err) => {
                                log::warn!("dropping packet: {err}");
                                self.stats.increment(StatKey::ClockSyncFailure);
                                return None;
                            }
                        };
                        self.clocks.to_trace_time(clock_id, raw_ts as i64)?
                    }
                    None => raw_ts as i64,
                }
            }
            None => self.latest_timestamp.max(sorter.max_timestamp()),
        };
        self.latest_timestamp = self.latest_timestamp.max(timestamp);
        Some(timestamp)
    }

    fn handle_incremental_state_cleared(&mut self, seq_id: Option<SequenceId>) {
        let Some(seq_id) = seq_id else {
            log::error!("incremental state cleared on a packet without trusted sequence id");
            self.stats.increment(StatKey::InternedDataErrors);
            return;
        };
        self.sequences
            .get_or_create(Some(seq_id))
            .on_incremental_state_cleared();
        self.handlers.notify_incremental_state_cleared(seq_id);
    }

    fn handle_previous_packet_dropped(&mut self, seq_id: Option<SequenceId>) {
        let Some(seq_id) = seq_id else {
            log::error!("previous packet dropped on a packet without trusted sequence id");
            self.stats.increment(StatKey::InternedDataErrors);
            return;
        };
        self.sequences.get_or_create(Some(seq_id)).on_packet_loss();
    }

    fn parse_trace_packet_defaults(&mut self, seq_id: Option<SequenceId>, defaults: RawRecord) {
        if seq_id.is_none() {
            log::error!("packet defaults on a packet without trusted sequence id");
            self.stats.increment(StatKey::InternedDataErrors);
            return;
        }
        if let Err(err) = self.sequences.get_or_create(seq_id).update_defaults(defaults) {
            log::warn!("failed to decode packet defaults: {err}");
            self.stats.increment(StatKey::DefaultsDecodeErrors);
        }
    }

    fn parse_interned_data(&mut self, seq_id: Option<SequenceId>, interned: RawRecord) {
        if seq_id.is_none() {
            log::error!("interned data on a packet without trusted sequence id");
            self.stats.increment(StatKey::InternedDataErrors);
            return;
        }
        let state = self.sequences.get_or_create(seq_id);
        if !state.is_incremental_state_valid() {
            // Whatever it references may have been interned in a lost packet.
            self.stats.increment(StatKey::TokenizerSkippedRecords);
            return;
        }

        let mut r = ProtoReader::new(interned.as_bytes());
        while let Some(field) = r.next_field() {
            let FieldValue::Bytes(blob) = field.value else {
                self.stats.increment(StatKey::InternedDataErrors);
                continue;
            };
            if let Err(err) = state.intern_message(field.id, RawRecord::new(blob)) {
                log::debug!("invalid interned entry in field {}: {err:?}", field.id);
                self.stats.increment(StatKey::InternedDataErrors);
            }
        }
        if r.has_error() {
            log::warn!("malformed interned data on sequence {:?}", seq_id);
            self.stats.increment(StatKey::InternedDataErrors);
        }
    }

    fn parse_clock_snapshot(&mut self, seq_id: Option<SequenceId>, data: &Bytes) {
        let snapshot = match ClockSnapshot::decode(data.clone()) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::warn!("failed to decode clock snapshot: {err}");
                self.stats.increment(StatKey::InvalidClockSnapshots);
                return;
            }
        };

        if let Some(primary) = snapshot.primary_trace_clock.filter(|id| *id != 0) {
            match ClockId::resolve(seq_id, primary) {
                Ok(clock_id) => self.clocks.set_trace_time_clock(clock_id),
                Err(err) => log::error!("invalid primary trace clock: {err}"),
            }
        }

        let mut readings = Vec::with_capacity(snapshot.clocks.len());
        for clock in &snapshot.clocks {
            let raw_id = clock.clock_id.unwrap_or(0);
            let clock_id = match ClockId::resolve(seq_id, raw_id) {
                Ok(clock_id) => clock_id,
                Err(err) => {
                    log::warn!("dropping clock snapshot reading: {err}");
                    self.stats.increment(StatKey::InvalidClockSnapshots);
                    continue;
                }
            };
            let unit_multiplier_ns = match clock.unit_multiplier_ns.unwrap_or(0) {
                0 => 1,
                m => i64::try_from(m).unwrap_or(0),
            };
            let mut reading = ClockReading::new(clock_id, clock.timestamp.unwrap_or(0) as i64)
                .with_unit_multiplier(unit_multiplier_ns);
            if clock.is_incremental.unwrap_or(false) {
                reading = reading.incremental();
            }
            readings.push(reading);
        }
        self.clocks.add_snapshot(&readings);
    }

    fn parse_service_event(
        &mut self,
        packet: &PacketView,
        seq_id: Option<SequenceId>,
        data: &Bytes,
        sorter: &mut Sorter,
        sink: &mut dyn PacketSink,
    ) {
        let event = match TracingServiceEvent::decode(data.clone()) {
            Ok(event) => event,
            Err(err) => {
                log::warn!("failed to decode tracing service event: {err}");
                self.stats.increment(StatKey::ServiceEventErrors);
                return;
            }
        };

        let generation = self.sequences.get_or_create(seq_id).current_generation().clone();
        let Some(ts) = self.packet_timestamp(packet, seq_id, &generation, sorter) else {
            return;
        };

        if event.tracing_started.unwrap_or(false) {
            self.metadata.tracing_started_ns = Some(ts);
        }
        if event.all_data_sources_started.unwrap_or(false) {
            self.metadata.all_data_sources_started_ns = Some(ts);
        }
        if event.tracing_disabled.unwrap_or(false) {
            self.metadata.tracing_disabled_ns = Some(ts);
        }
        if event.all_data_sources_flushed.unwrap_or(false) {
            self.metadata.flush_events += 1;
            sorter.notify_flush_event(ts, sink);
        }
        if event.read_tracing_buffers_completed.unwrap_or(false) {
            self.metadata.read_buffer_events += 1;
            sorter.notify_read_buffer_event(ts, sink);
        }
    }

    fn parse_extension_descriptor(&mut self, data: &Bytes) {
        match ExtensionDescriptor::decode(data.clone()) {
            Ok(ExtensionDescriptor {
                extension_set: Some(set),
            }) => {
                let unresolved = self.descriptors.add_file_descriptor_set(set);
                if unresolved > 0 {
                    log::warn!("{unresolved} extension fields target unknown messages");
                    self.stats.increment(StatKey::ExtensionDescriptorErrors);
                }
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!("failed to decode extension descriptor: {err}");
                self.stats.increment(StatKey::ExtensionDescriptorErrors);
            }
        }
    }

    fn parse_trace_config(&self, data: &Bytes, sorter: &Sorter) {
        let Ok(config) = TraceConfig::decode(data.clone()) else {
            return;
        };
        if buffers_whole_trace(&config, sorter.mode()) {
            log::warn!(
                "trace was written to a file without a flush period; windowed sorting \
                 may have to buffer the whole trace"
            );
        }
    }
}

/// Whether a trace written with `config` gives windowed sorting no
/// flush events to drain on.
fn buffers_whole_trace(config: &TraceConfig, mode: SortingMode) -> bool {
    mode == SortingMode::Heuristic
        && config.write_into_file.unwrap_or(false)
        && config.flush_period_ms.unwrap_or(0) == 0
}
