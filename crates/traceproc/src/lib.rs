//! Ingestion core for packet-based binary traces.
//!
//! A trace is a stream of length-delimited protobuf packets written by many
//! independent writer sequences, each with its own clocks and incremental
//! state. This crate turns that stream into one timeline in a single trace
//! clock and hands every packet downstream in timestamp order.
//!
//! # Pipeline
//!
//! | Stage | Module | Role |
//! |-------|--------|------|
//! | Tokenizer | [`tokenizer`] | Splits chunks into packets, expands compressed containers |
//! | Decoder | [`parser`] | Applies sequence state, resolves timestamps, runs field handlers |
//! | Clocks | [`clock`] | Converts timestamps from any clock domain into trace time |
//! | Sequences | [`sequence`] | Per-writer defaults and interned data, by generation |
//! | Sorter | [`sorter`] | Reorders packets, windowed or full sort |
//!
//! Recoverable problems with individual packets are counted in [`Stats`];
//! only structural corruption fails ingestion with a [`TraceError`].
//!
//! # Usage
//!
//! ```no_run
//! use encore_traceproc::{Config, RawRecord, SequenceContext, TraceSession};
//!
//! let sink = |ts: i64, _seq: &SequenceContext, packet: RawRecord| {
//!     println!("{ts}: {} bytes", packet.len());
//! };
//! let mut session = TraceSession::new(Config::from_env(), sink);
//!
//! let file = std::fs::File::open("trace.pftrace").unwrap();
//! session.parse_reader(file, encore_traceproc::DEFAULT_CHUNK_SIZE).unwrap();
//! session.notify_end_of_file().unwrap();
//!
//! for (stat, value) in session.stats().snapshot() {
//!     println!("{stat}: {value}");
//! }
//! ```

pub mod builder;
pub mod clock;
pub mod config;
pub mod descriptors;
pub mod handler;
pub mod metadata;
pub mod packet;
pub mod parser;
pub mod protos;
pub mod reader;
pub mod sequence;
mod session;
pub mod sorter;
pub mod stats;
pub mod tokenizer;
pub mod types;

pub use clock::{ClockError, ClockId, ClockReading, ClockTracker};
pub use config::{Config, SortingMode};
pub use handler::{FieldContext, FieldHandler, HandlerResult, PacketSink};
pub use packet::PacketView;
pub use sequence::SequenceContext;
pub use session::{TraceSession, DEFAULT_CHUNK_SIZE};
pub use stats::{Severity, StatKey, Stats};
pub use types::{RawRecord, SequenceId, TraceError};
