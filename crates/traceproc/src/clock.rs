//! Clock synchronization.
//!
//! Every clock snapshot adds one edge between each pair of clocks it contains.
//! Converting a timestamp walks the shortest path from its clock to the trace
//! time clock and, at every hop, applies the offset recorded by the nearest
//! snapshot at or before the timestamp.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::stats::{StatKey, Stats};
use crate::types::SequenceId;

/// Clocks with a fixed, writer-independent id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BuiltinClock {
    Realtime = 1,
    RealtimeCoarse = 2,
    Monotonic = 3,
    MonotonicCoarse = 4,
    MonotonicRaw = 5,
    Boottime = 6,
}

impl BuiltinClock {
    pub fn from_id(id: u64) -> Option<Self> {
        match id {
            1 => Some(Self::Realtime),
            2 => Some(Self::RealtimeCoarse),
            3 => Some(Self::Monotonic),
            4 => Some(Self::MonotonicCoarse),
            5 => Some(Self::MonotonicRaw),
            6 => Some(Self::Boottime),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Realtime => "REALTIME",
            Self::RealtimeCoarse => "REALTIME_COARSE",
            Self::Monotonic => "MONOTONIC",
            Self::MonotonicCoarse => "MONOTONIC_COARSE",
            Self::MonotonicRaw => "MONOTONIC_RAW",
            Self::Boottime => "BOOTTIME",
        }
    }
}

/// Why a clock id written in a packet could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    #[error("sequence-scoped clock {0} used on a packet without trusted sequence id")]
    MissingSequence(u32),
}

const SEQ_SCOPED_CLOCK_MIN: u32 = 64;
const SEQ_SCOPED_CLOCK_MAX: u32 = 127;

/// A globally unique clock key.
///
/// Sequence-scoped clocks carry their owning sequence in the upper 32 bits so
/// two writers that both use local clock 64 never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClockId(u64);

impl ClockId {
    pub const BOOTTIME: ClockId = ClockId::builtin(BuiltinClock::Boottime);

    pub const fn builtin(clock: BuiltinClock) -> Self {
        ClockId(clock as u64)
    }

    /// Whether `local_id` falls in the range reserved for sequence-scoped clocks.
    pub fn is_sequence_scoped_local(local_id: u32) -> bool {
        (SEQ_SCOPED_CLOCK_MIN..=SEQ_SCOPED_CLOCK_MAX).contains(&local_id)
    }

    /// Namespaces a sequence-scoped clock id with its owning sequence.
    pub fn sequence_scoped(seq_id: SequenceId, local_id: u32) -> Self {
        debug_assert!(Self::is_sequence_scoped_local(local_id));
        ClockId(((seq_id.get() as u64) << 32) | local_id as u64)
    }

    /// Resolves a clock id as written in a packet.
    ///
    /// Sequence-scoped ids need a sequence to be namespaced into; the caller
    /// drops whatever carried one without a sequence.
    pub fn resolve(seq_id: Option<SequenceId>, raw_id: u32) -> Result<Self, ClockError> {
        if !Self::is_sequence_scoped_local(raw_id) {
            return Ok(ClockId(raw_id as u64));
        }
        match seq_id {
            Some(seq_id) => Ok(Self::sequence_scoped(seq_id, raw_id)),
            None => Err(ClockError::MissingSequence(raw_id)),
        }
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_sequence_scoped(self) -> bool {
        self.0 >> 32 != 0
    }

    pub fn builtin_clock(self) -> Option<BuiltinClock> {
        BuiltinClock::from_id(self.0)
    }
}

impl std::fmt::Display for ClockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(builtin) = self.builtin_clock() {
            f.write_str(builtin.name())
        } else if self.is_sequence_scoped() {
            write!(f, "seq{}/{}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// One clock reading inside a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    pub clock_id: ClockId,
    pub timestamp: i64,
    pub unit_multiplier_ns: i64,
    pub is_incremental: bool,
}

impl ClockReading {
    pub fn new(clock_id: ClockId, timestamp: i64) -> Self {
        ClockReading {
            clock_id,
            timestamp,
            unit_multiplier_ns: 1,
            is_incremental: false,
        }
    }

    pub fn with_unit_multiplier(self, unit_multiplier_ns: i64) -> Self {
        ClockReading {
            unit_multiplier_ns,
            ..self
        }
    }

    pub fn incremental(self) -> Self {
        ClockReading {
            is_incremental: true,
            ..self
        }
    }
}

/// A reading of a stored snapshot, resolved to trace time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockSnapshotRow {
    pub snapshot_id: u32,
    pub ts: i64,
    pub clock_id: ClockId,
    pub clock_value: i64,
    pub clock_name: Option<&'static str>,
}

/// Identifies the set of clocks a snapshot contains.
type SnapshotHash = u64;

type Hop = (ClockId, ClockId, SnapshotHash);

#[derive(Debug, Default)]
struct ClockSnapshots {
    snapshot_ids: Vec<u32>,
    timestamps_ns: Vec<i64>,
}

#[derive(Debug)]
struct ClockDomain {
    unit_multiplier_ns: i64,
    is_incremental: bool,
    last_timestamp_ns: i64,
    snapshots: HashMap<SnapshotHash, ClockSnapshots>,
}

impl ClockDomain {
    fn new(unit_multiplier_ns: i64, is_incremental: bool) -> Self {
        ClockDomain {
            unit_multiplier_ns,
            is_incremental,
            last_timestamp_ns: 0,
            snapshots: HashMap::new(),
        }
    }

    fn to_ns(&self, ts: i64) -> i64 {
        ts.saturating_mul(self.unit_multiplier_ns)
    }

    /// Converts a raw packet timestamp to nanoseconds in this domain.
    /// Incremental clocks are delta-encoded against the last value seen.
    fn ingest(&mut self, ts: i64) -> i64 {
        if self.is_incremental {
            self.last_timestamp_ns = self.last_timestamp_ns.saturating_add(self.to_ns(ts));
            self.last_timestamp_ns
        } else {
            self.to_ns(ts)
        }
    }
}

/// Converts timestamps from any known clock domain into trace time.
#[derive(Debug)]
pub struct ClockTracker {
    clocks: HashMap<ClockId, ClockDomain>,
    /// Directed edges; every snapshot inserts both directions.
    graph: BTreeSet<Hop>,
    trace_time_clock: ClockId,
    trace_time_clock_used: bool,
    next_snapshot_id: u32,
    non_monotonic: HashSet<ClockId>,
    path_cache: HashMap<ClockId, Option<Arc<[Hop]>>>,
    rows: Vec<ClockSnapshotRow>,
    stats: Arc<Stats>,
}

impl ClockTracker {
    pub fn new(stats: Arc<Stats>) -> Self {
        ClockTracker {
            clocks: HashMap::new(),
            graph: BTreeSet::new(),
            trace_time_clock: ClockId::BOOTTIME,
            trace_time_clock_used: false,
            next_snapshot_id: 0,
            non_monotonic: HashSet::new(),
            path_cache: HashMap::new(),
            rows: Vec::new(),
            stats,
        }
    }

    pub fn trace_time_clock(&self) -> ClockId {
        self.trace_time_clock
    }

    /// Redirects all later conversions to `clock_id`. Last call wins.
    pub fn set_trace_time_clock(&mut self, clock_id: ClockId) {
        if clock_id == self.trace_time_clock {
            return;
        }
        if clock_id.is_sequence_scoped() {
            log::error!("sequence-scoped clock {clock_id} cannot be the trace time clock");
            return;
        }
        if self.trace_time_clock_used {
            log::warn!(
                "changing trace time clock from {} to {} after it was already used for \
                 timestamp conversion; is the clock snapshot too late in the trace?",
                self.trace_time_clock,
                clock_id
            );
        }
        self.trace_time_clock = clock_id;
        self.path_cache.clear();
    }

    /// Every resolved reading of every stored snapshot, in insertion order.
    pub fn snapshot_rows(&self) -> &[ClockSnapshotRow] {
        &self.rows
    }

    /// Clocks whose snapshot readings went backwards at least once.
    pub fn is_non_monotonic(&self, clock_id: ClockId) -> bool {
        self.non_monotonic.contains(&clock_id)
    }

    /// Stores a snapshot and returns its id.
    ///
    /// Readings that conflict with what is already known about their clock
    /// are dropped one by one; the rest of the snapshot is still applied.
    pub fn add_snapshot(&mut self, readings: &[ClockReading]) -> u32 {
        let snapshot_id = self.next_snapshot_id;
        self.next_snapshot_id += 1;

        let mut accepted: Vec<ClockReading> = Vec::with_capacity(readings.len());
        let mut seen = HashSet::with_capacity(readings.len());
        for reading in readings {
            if !seen.insert(reading.clock_id) {
                log::warn!(
                    "clock sync error: duplicate clock {} in snapshot {snapshot_id}",
                    reading.clock_id
                );
                self.stats.increment(StatKey::InvalidClockSnapshots);
                continue;
            }
            if reading.unit_multiplier_ns <= 0 {
                log::warn!(
                    "clock sync error: invalid unit multiplier {} for clock {}",
                    reading.unit_multiplier_ns,
                    reading.clock_id
                );
                self.stats.increment(StatKey::InvalidClockSnapshots);
                continue;
            }
            if let Some(domain) = self.clocks.get(&reading.clock_id) {
                if domain.unit_multiplier_ns != reading.unit_multiplier_ns
                    || domain.is_incremental != reading.is_incremental
                {
                    log::warn!(
                        "clock sync error: clock {} changed its unit multiplier or \
                         incremental flag",
                        reading.clock_id
                    );
                    self.stats.increment(StatKey::InvalidClockSnapshots);
                    continue;
                }
            }
            accepted.push(*reading);
        }

        // A backwards trace clock would make every conversion through it
        // ambiguous, so that reading is rejected. The hash changes when it is
        // removed, hence the loop.
        let hash = loop {
            let hash = snapshot_hash(&accepted);
            let trace_clock = self.trace_time_clock;
            let regressed = accepted.iter().position(|r| {
                r.clock_id == trace_clock && self.goes_backwards(r, hash)
            });
            match regressed {
                Some(pos) => {
                    log::warn!("clock sync error: the trace clock {trace_clock} is not monotonic");
                    self.stats.increment(StatKey::InvalidClockSnapshots);
                    accepted.remove(pos);
                }
                None => break hash,
            }
        };

        for reading in &accepted {
            if reading.clock_id != self.trace_time_clock && self.goes_backwards(reading, hash) {
                if self.non_monotonic.insert(reading.clock_id) {
                    log::debug!("detected non-monotonic clock {}", reading.clock_id);
                }
            }
            let domain = self
                .clocks
                .entry(reading.clock_id)
                .or_insert_with(|| {
                    ClockDomain::new(reading.unit_multiplier_ns, reading.is_incremental)
                });
            let timestamp_ns = domain.to_ns(reading.timestamp);
            domain.last_timestamp_ns = timestamp_ns;
            let snapshots = domain.snapshots.entry(hash).or_default();
            snapshots.snapshot_ids.push(snapshot_id);
            snapshots.timestamps_ns.push(timestamp_ns);
        }

        let mut graph_changed = false;
        for (i, a) in accepted.iter().enumerate() {
            for b in &accepted[i + 1..] {
                graph_changed |= self.graph.insert((a.clock_id, b.clock_id, hash));
                graph_changed |= self.graph.insert((b.clock_id, a.clock_id, hash));
            }
        }
        if graph_changed {
            self.path_cache.clear();
        }

        self.record_rows(snapshot_id, &accepted);
        snapshot_id
    }

    fn goes_backwards(&self, reading: &ClockReading, hash: SnapshotHash) -> bool {
        self.clocks
            .get(&reading.clock_id)
            .and_then(|domain| {
                let last = domain.snapshots.get(&hash)?.timestamps_ns.last()?;
                Some(domain.to_ns(reading.timestamp) < *last)
            })
            .unwrap_or(false)
    }

    /// Records the readings and checks they all land on the same trace time.
    fn record_rows(&mut self, snapshot_id: u32, readings: &[ClockReading]) {
        let mut expected: Option<i64> = None;
        let mut consistent = true;
        for reading in readings {
            // Incremental clocks map 0 to the absolute value just stored.
            let value = if reading.is_incremental {
                0
            } else {
                reading.timestamp
            };
            let Some(ts) = self.convert(reading.clock_id, value) else {
                continue;
            };
            match expected {
                Some(expected) if expected != ts => consistent = false,
                Some(_) => {}
                None => expected = Some(ts),
            }
            self.rows.push(ClockSnapshotRow {
                snapshot_id,
                ts,
                clock_id: reading.clock_id,
                clock_value: reading.timestamp,
                clock_name: reading.clock_id.builtin_clock().map(BuiltinClock::name),
            });
        }
        if !consistent {
            log::warn!("clock snapshot {snapshot_id} does not resolve to a single trace time");
            self.stats.increment(StatKey::ClockSnapshotInconsistent);
        }
    }

    /// Converts `ts` in `clock_id` to trace time.
    ///
    /// Returns `None` and counts a `clock_sync_failure` when no chain of
    /// snapshots connects the clock to the trace time clock.
    pub fn to_trace_time(&mut self, clock_id: ClockId, ts: i64) -> Option<i64> {
        let converted = self.convert(clock_id, ts);
        if converted.is_none() {
            self.stats.increment(StatKey::ClockSyncFailure);
        }
        converted
    }

    fn convert(&mut self, src: ClockId, ts: i64) -> Option<i64> {
        self.trace_time_clock_used = true;

        if src == self.trace_time_clock {
            return Some(match self.clocks.get_mut(&src) {
                Some(domain) => domain.ingest(ts),
                None => ts,
            });
        }

        let path = self.find_path(src)?;
        let mut ns = self.clocks.get_mut(&src)?.ingest(ts);
        for (from, to, hash) in path.iter() {
            let src_snapshots = self.clocks.get(from)?.snapshots.get(hash)?;
            let tgt_snapshots = self.clocks.get(to)?.snapshots.get(hash)?;
            let index = if self.non_monotonic.contains(from) {
                latest_at_or_before(&src_snapshots.timestamps_ns, ns)
            } else {
                nearest_at_or_before(&src_snapshots.timestamps_ns, ns)
            };
            let src_ns = *src_snapshots.timestamps_ns.get(index)?;
            let tgt_ns = *tgt_snapshots.timestamps_ns.get(index)?;
            ns = tgt_ns.saturating_add(ns.saturating_sub(src_ns));
        }
        Some(ns)
    }

    /// Shortest path (fewest hops) from `src` to the trace time clock.
    fn find_path(&mut self, src: ClockId) -> Option<Arc<[Hop]>> {
        if let Some(cached) = self.path_cache.get(&src) {
            return cached.clone();
        }

        let target = self.trace_time_clock;
        let mut parents: HashMap<ClockId, Hop> = HashMap::new();
        let mut visited: HashSet<ClockId> = HashSet::from([src]);
        let mut queue = VecDeque::from([src]);
        let mut found = false;

        while let Some(node) = queue.pop_front() {
            if node == target {
                found = true;
                break;
            }
            let edges = self
                .graph
                .range((node, ClockId(0), 0)..=(node, ClockId(u64::MAX), u64::MAX));
            for &(from, to, hash) in edges {
                if visited.insert(to) {
                    parents.insert(to, (from, to, hash));
                    queue.push_back(to);
                }
            }
        }

        let path = if found {
            let mut hops = Vec::new();
            let mut node = target;
            while let Some(hop) = parents.get(&node) {
                hops.push(*hop);
                node = hop.0;
            }
            hops.reverse();
            Some(Arc::from(hops))
        } else {
            None
        };
        self.path_cache.insert(src, path.clone());
        path
    }
}

fn snapshot_hash(readings: &[ClockReading]) -> SnapshotHash {
    let mut ids: Vec<ClockId> = readings.iter().map(|r| r.clock_id).collect();
    ids.sort_unstable();
    let mut hasher = DefaultHasher::new();
    ids.hash(&mut hasher);
    hasher.finish()
}

/// Index of the last value <= `ns` in a sorted vector, or 0 if all are greater.
fn nearest_at_or_before(sorted: &[i64], ns: i64) -> usize {
    sorted.partition_point(|&t| t <= ns).saturating_sub(1)
}

/// Index of the most recently inserted value <= `ns`, or 0 if all are greater.
fn latest_at_or_before(values: &[i64], ns: i64) -> usize {
    values.iter().rposition(|&t| t <= ns).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOT: ClockId = ClockId::builtin(BuiltinClock::Boottime);
    const MONO: ClockId = ClockId::builtin(BuiltinClock::Monotonic);
    const REAL: ClockId = ClockId::builtin(BuiltinClock::Realtime);
    const RAW: ClockId = ClockId::builtin(BuiltinClock::MonotonicRaw);

    fn tracker() -> ClockTracker {
        ClockTracker::new(Arc::new(Stats::new()))
    }

    fn seq(id: u32) -> SequenceId {
        SequenceId::new(id).unwrap()
    }

    #[test]
    fn test_trace_clock_is_identity() {
        let mut ct = tracker();
        assert_eq!(ct.to_trace_time(BOOT, 100), Some(100));
    }

    #[test]
    fn test_single_hop() {
        let mut ct = tracker();
        ct.add_snapshot(&[ClockReading::new(BOOT, 1000), ClockReading::new(MONO, 900)]);
        assert_eq!(ct.to_trace_time(MONO, 950), Some(1050));
    }

    #[test]
    fn test_nearest_prior_snapshot() {
        let mut ct = tracker();
        ct.add_snapshot(&[ClockReading::new(BOOT, 1000), ClockReading::new(MONO, 900)]);
        ct.add_snapshot(&[ClockReading::new(BOOT, 2000), ClockReading::new(MONO, 1850)]);

        assert_eq!(ct.to_trace_time(MONO, 1000), Some(1100));
        assert_eq!(ct.to_trace_time(MONO, 1900), Some(2050));
        // Before the first snapshot the first one still applies.
        assert_eq!(ct.to_trace_time(MONO, 800), Some(900));
    }

    #[test]
    fn test_multi_hop() {
        let mut ct = tracker();
        ct.add_snapshot(&[ClockReading::new(REAL, 10_000), ClockReading::new(MONO, 100)]);
        ct.add_snapshot(&[ClockReading::new(MONO, 200), ClockReading::new(BOOT, 1200)]);
        assert_eq!(ct.to_trace_time(REAL, 10_050), Some(1150));
    }

    #[test]
    fn test_offset_clocks_resolve_to_same_trace_time() {
        fn prop(k: u16, t: u16, base: u32) -> bool {
            let (k, t, base) = (k as i64, t as i64, base as i64);
            let mut ct = tracker();
            // REAL(t) = MONO(t) + k at every snapshot.
            for i in 0..3 {
                let mono = base + i * 1000;
                ct.add_snapshot(&[
                    ClockReading::new(BOOT, mono + 5_000),
                    ClockReading::new(MONO, mono),
                    ClockReading::new(REAL, mono + k),
                ]);
            }
            let mono = base + t;
            ct.to_trace_time(MONO, mono) == ct.to_trace_time(REAL, mono + k)
        }
        quickcheck::quickcheck(prop as fn(u16, u16, u32) -> bool);
    }

    #[test]
    fn test_unit_multiplier_for_sequence_scoped_clock() {
        let mut ct = tracker();
        let local = ClockId::sequence_scoped(seq(1), 64);
        ct.add_snapshot(&[
            ClockReading::new(BOOT, 1_000_000),
            ClockReading::new(local, 1000).with_unit_multiplier(1000),
        ]);
        assert_eq!(ct.to_trace_time(local, 1001), Some(1_001_000));
    }

    #[test]
    fn test_incremental_clock() {
        let mut ct = tracker();
        let local = ClockId::sequence_scoped(seq(1), 65);
        ct.add_snapshot(&[
            ClockReading::new(BOOT, 5000),
            ClockReading::new(local, 100).incremental(),
        ]);
        assert_eq!(ct.to_trace_time(local, 10), Some(5010));
        assert_eq!(ct.to_trace_time(local, 5), Some(5015));
    }

    #[test]
    fn test_unknown_clock_counts_failure() {
        let stats = Arc::new(Stats::new());
        let mut ct = ClockTracker::new(stats.clone());
        assert_eq!(ct.to_trace_time(MONO, 10), None);
        assert_eq!(stats.get(StatKey::ClockSyncFailure), 1);
    }

    #[test]
    fn test_duplicate_reading_dropped_individually() {
        let stats = Arc::new(Stats::new());
        let mut ct = ClockTracker::new(stats.clone());
        ct.add_snapshot(&[
            ClockReading::new(BOOT, 100),
            ClockReading::new(MONO, 50),
            ClockReading::new(MONO, 60),
        ]);
        assert_eq!(stats.get(StatKey::InvalidClockSnapshots), 1);
        assert_eq!(ct.to_trace_time(MONO, 50), Some(100));
    }

    #[test]
    fn test_changed_unit_multiplier_is_rejected() {
        let stats = Arc::new(Stats::new());
        let mut ct = ClockTracker::new(stats.clone());
        ct.add_snapshot(&[ClockReading::new(BOOT, 100), ClockReading::new(MONO, 50)]);
        ct.add_snapshot(&[
            ClockReading::new(BOOT, 200),
            ClockReading::new(MONO, 150).with_unit_multiplier(1000),
        ]);
        assert_eq!(stats.get(StatKey::InvalidClockSnapshots), 1);
    }

    #[test]
    fn test_primary_trace_clock_last_write_wins() {
        let mut ct = tracker();
        ct.set_trace_time_clock(REAL);
        ct.set_trace_time_clock(MONO);
        ct.set_trace_time_clock(MONO);
        assert_eq!(ct.trace_time_clock(), MONO);

        ct.add_snapshot(&[ClockReading::new(BOOT, 1000), ClockReading::new(MONO, 900)]);
        assert_eq!(ct.to_trace_time(BOOT, 1100), Some(1000));
        assert_eq!(ct.to_trace_time(MONO, 42), Some(42));
    }

    #[test]
    fn test_sequence_scoped_resolution() {
        assert_eq!(
            ClockId::resolve(None, 64),
            Err(ClockError::MissingSequence(64))
        );
        assert_eq!(ClockId::resolve(None, 3).unwrap(), MONO);

        let a = ClockId::resolve(Some(seq(1)), 64).unwrap();
        let b = ClockId::resolve(Some(seq(2)), 64).unwrap();
        assert_ne!(a, b);
        assert!(a.is_sequence_scoped());
        assert_eq!(a.to_string(), "seq1/64");
    }

    #[test]
    fn test_backwards_trace_clock_reading_is_rejected() {
        let stats = Arc::new(Stats::new());
        let mut ct = ClockTracker::new(stats.clone());
        ct.add_snapshot(&[ClockReading::new(BOOT, 1000), ClockReading::new(MONO, 10)]);
        ct.add_snapshot(&[ClockReading::new(BOOT, 900), ClockReading::new(MONO, 20)]);
        assert_eq!(stats.get(StatKey::InvalidClockSnapshots), 1);
        assert_eq!(ct.to_trace_time(MONO, 15), Some(1005));
    }

    #[test]
    fn test_non_monotonic_clock_is_flagged() {
        let mut ct = tracker();
        ct.add_snapshot(&[ClockReading::new(BOOT, 1000), ClockReading::new(MONO, 500)]);
        ct.add_snapshot(&[ClockReading::new(BOOT, 2000), ClockReading::new(MONO, 400)]);
        assert!(ct.is_non_monotonic(MONO));
        assert!(!ct.is_non_monotonic(BOOT));
        // The most recent snapshot at or before the value wins.
        assert_eq!(ct.to_trace_time(MONO, 450), Some(2050));
    }

    #[test]
    fn test_inconsistent_snapshot_is_counted() {
        let stats = Arc::new(Stats::new());
        let mut ct = ClockTracker::new(stats.clone());
        ct.add_snapshot(&[ClockReading::new(BOOT, 1000), ClockReading::new(MONO, 500)]);
        ct.add_snapshot(&[
            ClockReading::new(MONO, 600),
            ClockReading::new(REAL, 50),
            ClockReading::new(RAW, 70),
        ]);
        assert_eq!(stats.get(StatKey::ClockSnapshotInconsistent), 0);

        // REAL and RAW both route through the previous snapshot and disagree.
        ct.add_snapshot(&[ClockReading::new(REAL, 1000), ClockReading::new(RAW, 2000)]);
        assert_eq!(stats.get(StatKey::ClockSnapshotInconsistent), 1);
    }

    #[test]
    fn test_snapshot_rows() {
        let mut ct = tracker();
        let id = ct.add_snapshot(&[ClockReading::new(BOOT, 1000), ClockReading::new(MONO, 900)]);
        let rows = ct.snapshot_rows();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.snapshot_id == id && r.ts == 1000));
        assert_eq!(rows[1].clock_name, Some("MONOTONIC"));
        assert_eq!(rows[1].clock_value, 900);
    }
}
