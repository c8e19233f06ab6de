//! Hand-written prost types for the nested trace packet messages the core
//! decodes itself.
//!
//! Only the fields the core reads are declared; prost skips everything else.

/// Default values applied to every later packet of the same sequence generation.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TracePacketDefaults {
    #[prost(uint32, optional, tag = "58")]
    pub timestamp_clock_id: ::core::option::Option<u32>,
}

/// A set of simultaneous clock readings.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClockSnapshot {
    #[prost(message, repeated, tag = "1")]
    pub clocks: ::prost::alloc::vec::Vec<clock_snapshot::Clock>,
    /// The clock all timestamps are converted into. Unset keeps the current one.
    #[prost(uint32, optional, tag = "2")]
    pub primary_trace_clock: ::core::option::Option<u32>,
}

pub mod clock_snapshot {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Clock {
        #[prost(uint32, optional, tag = "1")]
        pub clock_id: ::core::option::Option<u32>,
        #[prost(uint64, optional, tag = "2")]
        pub timestamp: ::core::option::Option<u64>,
        #[prost(bool, optional, tag = "3")]
        pub is_incremental: ::core::option::Option<bool>,
        /// Zero or unset means nanoseconds.
        #[prost(uint64, optional, tag = "4")]
        pub unit_multiplier_ns: ::core::option::Option<u64>,
    }
}

/// Lifecycle events emitted by the tracing service.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TracingServiceEvent {
    #[prost(bool, optional, tag = "1")]
    pub all_data_sources_started: ::core::option::Option<bool>,
    #[prost(bool, optional, tag = "2")]
    pub tracing_started: ::core::option::Option<bool>,
    #[prost(bool, optional, tag = "3")]
    pub all_data_sources_flushed: ::core::option::Option<bool>,
    #[prost(bool, optional, tag = "4")]
    pub read_tracing_buffers_completed: ::core::option::Option<bool>,
    #[prost(bool, optional, tag = "5")]
    pub tracing_disabled: ::core::option::Option<bool>,
}

/// The subset of the recording configuration that affects ingestion.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TraceConfig {
    #[prost(bool, optional, tag = "8")]
    pub write_into_file: ::core::option::Option<bool>,
    #[prost(uint32, optional, tag = "13")]
    pub flush_period_ms: ::core::option::Option<u32>,
}

/// Schema extensions shipped inside the trace.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExtensionDescriptor {
    #[prost(message, optional, tag = "1")]
    pub extension_set: ::core::option::Option<::prost_types::FileDescriptorSet>,
}
