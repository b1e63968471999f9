// Per-request run-time state
//
// All mutable execution state lives here, never in the access-path nodes:
// one stream buffer per compiled stream and one impure slot per node. The
// impure slot is deliberately generic - each node variant interprets the
// flags/counters it needs, the way the engine keeps per-node state in one
// request-owned arena.

use super::{RequestId, Row, Statement};
use std::sync::Arc;

/// Impure flag: the node has been opened and not yet closed.
pub const IRSB_OPEN: u8 = 0x01;
/// Impure flag: a full outer join is still draining its first argument.
pub const IRSB_FIRST: u8 = 0x02;
/// Impure flag: a singular stream already produced its row.
pub const IRSB_SINGULAR_PROCESSED: u8 = 0x04;

/// One node's run-time state.
#[derive(Debug, Clone, Default)]
pub struct Impure {
    pub flags: u8,
    /// Current argument index (unions), current row index (scans), or the
    /// cursor state machine value.
    pub arg: usize,
    pub position: usize,
    /// Buffered rows for sorted streams.
    pub rows: Vec<Row>,
}

/// One stream's current record.
#[derive(Debug, Clone, Default)]
pub struct StreamBuffer {
    pub record: Option<Row>,
    pub valid: bool,
}

/// Aggregate counters reported to the profiler backend on request finish.
#[derive(Debug, Clone, Default)]
pub struct RequestStats {
    pub records_fetched: u64,
}

/// An executing instance of a statement.
pub struct Request {
    id: RequestId,
    statement: Arc<Statement>,
    streams: Vec<StreamBuffer>,
    impure: Vec<Impure>,
    pub stats: RequestStats,
}

impl Request {
    pub fn new(id: RequestId, statement: Arc<Statement>) -> Self {
        let streams = vec![StreamBuffer::default(); statement.stream_count()];
        let impure = vec![Impure::default(); statement.impure_count()];
        Self {
            id,
            statement,
            streams,
            impure,
            stats: RequestStats::default(),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn statement(&self) -> &Arc<Statement> {
        &self.statement
    }

    pub fn impure(&self, slot: usize) -> &Impure {
        &self.impure[slot]
    }

    pub fn impure_mut(&mut self, slot: usize) -> &mut Impure {
        &mut self.impure[slot]
    }

    pub fn stream(&self, stream: usize) -> &StreamBuffer {
        &self.streams[stream]
    }

    pub fn stream_mut(&mut self, stream: usize) -> &mut StreamBuffer {
        &mut self.streams[stream]
    }
}
