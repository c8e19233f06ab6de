//! The reordering engine.
//!
//! Decoded packets are buffered in a min-heap keyed by `(timestamp, arrival)`
//! so that equal timestamps come out in the order they were pushed.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::config::SortingMode;
use crate::handler::PacketSink;
use crate::sequence::SequenceContext;
use crate::stats::{StatKey, Stats};
use crate::types::RawRecord;

/// Buffering this many packets without ever seeing a lifecycle event is worth
/// a warning: the whole trace ends up in memory before anything is emitted.
const UNWINDOWED_WARNING_THRESHOLD: usize = 1 << 20;

/// A packet ready for ordering: its trace-time timestamp, the sequence state it
/// was decoded against, and the still-undissected payload.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub ts: i64,
    pub sequence: SequenceContext,
    pub packet: RawRecord,
}

#[derive(Debug)]
struct Queued {
    arrival: u64,
    event: DecodedEvent,
}

impl Queued {
    fn key(&self) -> (i64, u64) {
        (self.event.ts, self.arrival)
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Buffers decoded events and emits them in timestamp order.
#[derive(Debug)]
pub struct Sorter {
    mode: SortingMode,
    queue: BinaryHeap<Reverse<Queued>>,
    next_arrival: u64,
    max_pushed_ts: i64,
    max_emitted_ts: Option<i64>,
    max_buffered: Option<usize>,
    lifecycle_events: u64,
    emitted: u64,
    stats: Arc<Stats>,
}

impl Sorter {
    pub fn new(mode: SortingMode, stats: Arc<Stats>) -> Self {
        Sorter {
            mode,
            queue: BinaryHeap::new(),
            next_arrival: 0,
            max_pushed_ts: 0,
            max_emitted_ts: None,
            max_buffered: None,
            lifecycle_events: 0,
            emitted: 0,
            stats,
        }
    }

    /// Caps the number of buffered events in heuristic mode. Exceeding the cap
    /// emits the whole buffer in insertion order.
    ///
    /// Timestamps emitted by such a fallback do not raise the late-drop
    /// baseline: only events older than the last ordered emission are dropped.
    pub fn with_max_buffered(mut self, max_buffered: usize) -> Self {
        self.max_buffered = Some(max_buffered);
        self
    }

    pub fn mode(&self) -> SortingMode {
        self.mode
    }

    /// Largest timestamp pushed so far, or 0 before the first push.
    pub fn max_timestamp(&self) -> i64 {
        self.max_pushed_ts
    }

    /// Number of buffered, not yet emitted events.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total number of events emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn push(&mut self, event: DecodedEvent, sink: &mut dyn PacketSink) {
        if self.mode == SortingMode::Heuristic {
            if let Some(max_emitted) = self.max_emitted_ts {
                if event.ts < max_emitted {
                    // Emitting it now would break monotonic emission.
                    log::debug!(
                        "dropping packet at {} older than already emitted {max_emitted}",
                        event.ts
                    );
                    self.stats.increment(StatKey::SorterLateEvents);
                    return;
                }
            }
        }

        self.max_pushed_ts = self.max_pushed_ts.max(event.ts);
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        self.queue.push(Reverse(Queued { arrival, event }));

        if self.mode == SortingMode::Heuristic
            && self.max_buffered.is_some_and(|max| self.queue.len() > max)
        {
            self.insertion_order_fallback(sink, "buffer limit exceeded");
        }
    }

    /// All data sources flushed up to `watermark`.
    pub fn notify_flush_event(&mut self, watermark: i64, sink: &mut dyn PacketSink) {
        self.on_lifecycle_event(watermark, sink);
    }

    /// The writer finished reading its buffers up to `watermark`.
    pub fn notify_read_buffer_event(&mut self, watermark: i64, sink: &mut dyn PacketSink) {
        self.on_lifecycle_event(watermark, sink);
    }

    fn on_lifecycle_event(&mut self, watermark: i64, sink: &mut dyn PacketSink) {
        self.lifecycle_events += 1;
        if self.mode == SortingMode::FullSort {
            return;
        }
        while let Some(Reverse(next)) = self.queue.peek() {
            if next.event.ts > watermark {
                break;
            }
            if let Some(Reverse(next)) = self.queue.pop() {
                self.emit(next, sink);
            }
        }
    }

    /// Emits everything buffered right now in insertion order, without waiting
    /// for a watermark. Ordering is not guaranteed for the emitted window, and
    /// the window does not count towards late-event detection.
    pub fn force_flush(&mut self, sink: &mut dyn PacketSink) {
        self.insertion_order_fallback(sink, "forced flush");
    }

    fn insertion_order_fallback(&mut self, sink: &mut dyn PacketSink, reason: &str) {
        if self.queue.is_empty() {
            return;
        }
        log::warn!(
            "{reason}: emitting {} buffered packets in insertion order; \
             timestamps in this window may be out of order",
            self.queue.len()
        );
        self.stats.increment(StatKey::SorterInsertionOrderFallback);

        let mut window: Vec<Queued> = std::mem::take(&mut self.queue)
            .into_iter()
            .map(|Reverse(queued)| queued)
            .collect();
        window.sort_unstable_by_key(|queued| queued.arrival);
        let baseline = self.max_emitted_ts;
        for queued in window {
            self.emit(queued, sink);
        }
        self.max_emitted_ts = baseline;
    }

    /// Emits every buffered event in timestamp order. Called at end of stream.
    pub fn flush_all(&mut self, sink: &mut dyn PacketSink) {
        if self.mode == SortingMode::Heuristic
            && self.lifecycle_events == 0
            && self.queue.len() >= UNWINDOWED_WARNING_THRESHOLD
        {
            log::warn!(
                "no flush or read-buffer events in the trace; all {} packets were buffered \
                 before sorting",
                self.queue.len()
            );
        }
        while let Some(Reverse(next)) = self.queue.pop() {
            self.emit(next, sink);
        }
    }

    fn emit(&mut self, queued: Queued, sink: &mut dyn PacketSink) {
        let DecodedEvent {
            ts,
            sequence,
            packet,
        } = queued.event;
        self.max_emitted_ts = Some(self.max_emitted_ts.map_or(ts, |max| max.max(ts)));
        self.emitted += 1;
        sink.consume(ts, &sequence, packet);
    }
}
