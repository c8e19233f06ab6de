use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

const STAT_COUNT: usize = 12;

/// How bad it is for a counter to be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Informational, expected in healthy traces.
    Info,
    /// Some trace data was dropped.
    DataLoss,
    /// The trace is inconsistent or malformed.
    Error,
}

/// Diagnostic counters, incremented on recoverable anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatKey {
    ClockSyncFailure,
    InvalidClockSnapshots,
    ClockSnapshotInconsistent,
    TokenizerSkippedRecords,
    TokenizerTruncatedPackets,
    InternedDataErrors,
    CompressedContainers,
    SorterLateEvents,
    SorterInsertionOrderFallback,
    ExtensionDescriptorErrors,
    DefaultsDecodeErrors,
    ServiceEventErrors,
}

impl StatKey {
    pub const ALL: [StatKey; STAT_COUNT] = [
        StatKey::ClockSyncFailure,
        StatKey::InvalidClockSnapshots,
        StatKey::ClockSnapshotInconsistent,
        StatKey::TokenizerSkippedRecords,
        StatKey::TokenizerTruncatedPackets,
        StatKey::InternedDataErrors,
        StatKey::CompressedContainers,
        StatKey::SorterLateEvents,
        StatKey::SorterInsertionOrderFallback,
        StatKey::ExtensionDescriptorErrors,
        StatKey::DefaultsDecodeErrors,
        StatKey::ServiceEventErrors,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StatKey::ClockSyncFailure => "clock_sync_failure",
            StatKey::InvalidClockSnapshots => "invalid_clock_snapshots",
            StatKey::ClockSnapshotInconsistent => "clock_snapshot_inconsistent",
            StatKey::TokenizerSkippedRecords => "tokenizer_skipped_records",
            StatKey::TokenizerTruncatedPackets => "tokenizer_truncated_packets",
            StatKey::InternedDataErrors => "interned_data_errors",
            StatKey::CompressedContainers => "compressed_containers",
            StatKey::SorterLateEvents => "sorter_late_events",
            StatKey::SorterInsertionOrderFallback => "sorter_insertion_order_fallback",
            StatKey::ExtensionDescriptorErrors => "extension_descriptor_errors",
            StatKey::DefaultsDecodeErrors => "defaults_decode_errors",
            StatKey::ServiceEventErrors => "service_event_errors",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            StatKey::CompressedContainers => Severity::Info,
            StatKey::ClockSyncFailure
            | StatKey::TokenizerSkippedRecords
            | StatKey::TokenizerTruncatedPackets
            | StatKey::InternedDataErrors
            | StatKey::SorterLateEvents => Severity::DataLoss,
            StatKey::InvalidClockSnapshots
            | StatKey::ClockSnapshotInconsistent
            | StatKey::SorterInsertionOrderFallback
            | StatKey::ExtensionDescriptorErrors
            | StatKey::DefaultsDecodeErrors
            | StatKey::ServiceEventErrors => Severity::Error,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// A table of monotonically increasing counters.
///
/// Counters are atomics so a shared `Arc<Stats>` can be read from any thread
/// while the ingesting thread keeps incrementing them.
#[derive(Debug, Default)]
pub struct Stats {
    counters: [AtomicU64; STAT_COUNT],
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, key: StatKey) {
        self.add(key, 1);
    }

    pub fn add(&self, key: StatKey, n: u64) {
        self.counters[key.index()].fetch_add(n, Ordering::Relaxed);
        metrics::counter!("traceproc_stats_total", "stat" => key.name()).increment(n);
    }

    pub fn get(&self, key: StatKey) -> u64 {
        self.counters[key.index()].load(Ordering::Relaxed)
    }

    /// Returns every counter by name, including those still at zero.
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        StatKey::ALL
            .iter()
            .map(|key| (key.name(), self.get(*key)))
            .collect()
    }

    /// Counters that are non-zero and indicate lost or inconsistent data.
    pub fn problems(&self) -> Vec<(StatKey, u64)> {
        StatKey::ALL
            .iter()
            .filter(|key| key.severity() != Severity::Info)
            .map(|key| (*key, self.get(*key)))
            .filter(|(_, value)| *value > 0)
            .collect()
    }
}
