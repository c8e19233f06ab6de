/// Session-wide facts learned from tracing service events, in trace time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceMetadata {
    pub tracing_started_ns: Option<i64>,
    pub tracing_disabled_ns: Option<i64>,
    pub all_data_sources_started_ns: Option<i64>,
    /// Number of flush lifecycle events seen.
    pub flush_events: u32,
    /// Number of read-buffers-completed lifecycle events seen.
    pub read_buffer_events: u32,
}
