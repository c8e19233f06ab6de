use encore_traceproc::{PacketSink, RawRecord, SequenceContext, SequenceId};

/// Records every emitted packet as `(ts, sequence id)`.
#[derive(Debug, Default)]
pub struct Collected(pub Vec<(i64, Option<u32>)>);

impl Collected {
    pub fn timestamps(&self) -> Vec<i64> {
        self.0.iter().map(|(ts, _)| *ts).collect()
    }
}

impl PacketSink for Collected {
    fn consume(&mut self, ts: i64, sequence: &SequenceContext, _packet: RawRecord) {
        self.0.push((ts, sequence.seq_id().map(SequenceId::get)));
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
