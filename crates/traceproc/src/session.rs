use std::io::{ErrorKind, Read};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::clock::ClockTracker;
use crate::config::Config;
use crate::descriptors::DescriptorPool;
use crate::handler::{FieldHandler, PacketSink};
use crate::metadata::TraceMetadata;
use crate::parser::PacketDecoder;
use crate::sorter::Sorter;
use crate::stats::{StatKey, Stats};
use crate::tokenizer::Tokenizer;
use crate::types::TraceError;

/// Default chunk size for [`TraceSession::parse_reader`].
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

/// One single-pass ingestion of a trace.
///
/// Input is pushed with [`parse`](Self::parse) in chunks of any size and the
/// session ends with [`notify_end_of_file`](Self::notify_end_of_file). Each
/// call runs to completion on the caller's thread. Sorted packets are handed
/// to the sink `S` as soon as the sorter releases them.
///
/// A fatal error poisons the session: every later call fails with
/// [`TraceError::Aborted`] and buffered packets are never emitted.
pub struct TraceSession<S: PacketSink> {
    config: Config,
    tokenizer: Tokenizer,
    decoder: PacketDecoder,
    sorter: Sorter,
    sink: S,
    stats: Arc<Stats>,
    poisoned: bool,
    ended: bool,
}

impl<S: PacketSink> TraceSession<S> {
    pub fn new(config: Config, sink: S) -> Self {
        let stats = Arc::new(Stats::new());
        TraceSession {
            tokenizer: Tokenizer::new(stats.clone()),
            decoder: PacketDecoder::new(stats.clone()),
            sorter: Sorter::new(config.sorting_mode, stats.clone()),
            config,
            sink,
            stats,
            poisoned: false,
            ended: false,
        }
    }

    /// Bounds the number of packets buffered by windowed sorting. Past the
    /// bound the buffer is emitted in insertion order.
    pub fn with_max_buffered_packets(mut self, max: usize) -> Self {
        self.sorter = self.sorter.with_max_buffered(max);
        self
    }

    /// Registers a decode-time handler for `field_ids`.
    pub fn register_handler(&mut self, handler: Box<dyn FieldHandler>, field_ids: &[u32]) {
        self.decoder.register_handler(handler, field_ids);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Pushes the next chunk of the trace.
    pub fn parse(&mut self, chunk: Bytes) -> Result<(), TraceError> {
        self.check_usable()?;

        let TraceSession {
            tokenizer,
            decoder,
            sorter,
            sink,
            ..
        } = &mut *self;
        let res = tokenizer.tokenize(chunk, &mut |raw| decoder.decode(raw, sorter, &mut *sink));
        if let Err(err) = &res {
            log::error!("aborting trace ingestion: {err}");
            self.poisoned = true;
        }
        res
    }

    /// Reads `reader` to the end, pushing it in chunks of `chunk_size` bytes.
    /// Returns the number of bytes read.
    pub fn parse_reader<R: Read>(
        &mut self,
        mut reader: R,
        chunk_size: usize,
    ) -> Result<u64, TraceError> {
        let chunk_size = chunk_size.max(1);
        let mut total = 0u64;
        loop {
            let mut buf = BytesMut::zeroed(chunk_size);
            let n = match reader.read(&mut buf) {
                Ok(0) => return Ok(total),
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            buf.truncate(n);
            total += n as u64;
            self.parse(buf.freeze())?;
        }
    }

    /// Ends the stream: drops any truncated trailing packet and emits
    /// everything still buffered, sorted.
    pub fn notify_end_of_file(&mut self) -> Result<(), TraceError> {
        self.check_usable()?;
        self.ended = true;

        let pending = self.tokenizer.finish();
        if pending > 0 {
            log::warn!("trace ends with a truncated packet; discarding {pending} bytes");
            self.stats.increment(StatKey::TokenizerTruncatedPackets);
        }

        self.sorter.flush_all(&mut self.sink);

        for (key, value) in self.stats.problems() {
            log::debug!("trace stat {}: {value}", key.name());
        }
        Ok(())
    }

    /// Emits everything buffered right now in insertion order.
    pub fn force_flush(&mut self) -> Result<(), TraceError> {
        self.check_usable()?;
        self.sorter.force_flush(&mut self.sink);
        Ok(())
    }

    fn check_usable(&self) -> Result<(), TraceError> {
        if self.poisoned {
            return Err(TraceError::Aborted);
        }
        if self.ended {
            return Err(TraceError::Internal("trace session used after end of file"));
        }
        Ok(())
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// A handle to the counters that stays valid after the session is gone.
    pub fn stats_handle(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    pub fn clock_tracker(&self) -> &ClockTracker {
        self.decoder.clock_tracker()
    }

    pub fn metadata(&self) -> &TraceMetadata {
        self.decoder.metadata()
    }

    pub fn descriptors(&self) -> &DescriptorPool {
        self.decoder.descriptors()
    }

    pub fn decoder(&self) -> &PacketDecoder {
        &self.decoder
    }

    /// Number of packets waiting in the sorter.
    pub fn buffered_packets(&self) -> usize {
        self.sorter.len()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::builder::{PacketBuilder, TraceBuilder};
    use crate::sequence::SequenceContext;
    use crate::types::RawRecord;

    #[derive(Default)]
    struct Timestamps(Vec<i64>);

    impl PacketSink for Timestamps {
        fn consume(&mut self, ts: i64, _sequence: &SequenceContext, _packet: RawRecord) {
            self.0.push(ts);
        }
    }

    fn trace(timestamps: &[u64]) -> Bytes {
        timestamps
            .iter()
            .fold(TraceBuilder::new(), |trace, ts| {
                trace.packet(PacketBuilder::new().timestamp(*ts))
            })
            .build()
    }

    #[test]
    fn test_end_of_file_emits_sorted() {
        let mut session = TraceSession::new(Config::default(), Timestamps::default());
        session.parse(trace(&[30, 10, 20])).unwrap();
        assert_eq!(session.buffered_packets(), 3);
        session.notify_end_of_file().unwrap();
        assert_eq!(session.into_sink().0, vec![10, 20, 30]);
    }

    #[test]
    fn test_fatal_error_poisons_session() {
        let mut session = TraceSession::new(Config::default(), Timestamps::default());
        session.parse(trace(&[5])).unwrap();
        assert_matches!(
            session.parse(Bytes::from_static(&[0x12, 0x00])),
            Err(TraceError::InvalidPreamble(_))
        );
        assert!(session.is_poisoned());
        assert_matches!(session.parse(trace(&[6])), Err(TraceError::Aborted));
        assert_matches!(session.notify_end_of_file(), Err(TraceError::Aborted));
        assert!(session.sink().0.is_empty());
    }

    #[test]
    fn test_truncated_trailing_packet_is_counted() {
        let data = trace(&[1, 2]);
        let mut session = TraceSession::new(Config::default(), Timestamps::default());
        session.parse(data.slice(..data.len() - 1)).unwrap();
        session.notify_end_of_file().unwrap();
        assert_eq!(session.stats().get(StatKey::TokenizerTruncatedPackets), 1);
        assert_eq!(session.sink().0, vec![1]);
    }

    #[test]
    fn test_parse_reader_in_small_chunks() {
        let data = trace(&[3, 1, 2]);
        let mut session = TraceSession::new(Config::default(), Timestamps::default());
        let read = session.parse_reader(&data[..], 3).unwrap();
        assert_eq!(read, data.len() as u64);
        session.notify_end_of_file().unwrap();
        assert_eq!(session.sink().0, vec![1, 2, 3]);
    }

    #[test]
    fn test_use_after_end_of_file() {
        let mut session = TraceSession::new(Config::default(), Timestamps::default());
        session.notify_end_of_file().unwrap();
        assert_matches!(session.parse(trace(&[1])), Err(TraceError::Internal(_)));
    }
}
