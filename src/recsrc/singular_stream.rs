// Data access: single row stream
//
// Guards a subquery that must produce at most one row. The first row is
// saved, the inner stream is probed for a second row (an error), and the
// saved buffers are restored so the caller still sees the first row.

use super::{AccessPathIds, PlanEntry, RecordSource, WriteLockResult};
use crate::engine::EngineContext;
use crate::error::{Error, Result};
use crate::exec::request::{IRSB_OPEN, IRSB_SINGULAR_PROCESSED};
use crate::exec::{CompilerScratch, Request, Row, StreamId};

pub struct SingularStream {
    ids: AccessPathIds,
    next: Box<dyn RecordSource>,
    streams: Vec<StreamId>,
    impure: usize,
}

impl SingularStream {
    pub fn new(scratch: &mut CompilerScratch, next: Box<dyn RecordSource>) -> Self {
        let mut streams = Vec::new();
        next.find_used_streams(&mut streams, false);
        Self {
            ids: AccessPathIds::alloc(scratch),
            next,
            streams,
            impure: scratch.alloc_impure(),
        }
    }

    /// Probe for a forbidden second row, preserving the first row's buffers.
    fn process(&self, ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<()> {
        let saved: Vec<(StreamId, Option<Row>, bool)> = self
            .streams
            .iter()
            .map(|&stream| {
                let buffer = req.stream(stream);
                (stream, buffer.record.clone(), buffer.valid)
            })
            .collect();

        if self.next.get_record(ctx, req)? {
            return Err(Error::SingularSelect);
        }

        for (stream, record, valid) in saved {
            let buffer = req.stream_mut(stream);
            buffer.record = record;
            buffer.valid = valid;
        }

        req.impure_mut(self.impure).flags |= IRSB_SINGULAR_PROCESSED;
        Ok(())
    }
}

impl RecordSource for SingularStream {
    fn ids(&self) -> AccessPathIds {
        self.ids
    }

    fn internal_open(&self, ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<()> {
        req.impure_mut(self.impure).flags |= IRSB_OPEN;
        self.next.open(ctx, req)
    }

    fn internal_get_record(&self, ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<bool> {
        let flags = req.impure(self.impure).flags;
        if flags & IRSB_OPEN == 0 || flags & IRSB_SINGULAR_PROCESSED != 0 {
            return Ok(false);
        }

        if self.next.get_record(ctx, req)? {
            self.process(ctx, req)?;
            return Ok(true);
        }

        Ok(false)
    }

    fn close(&self, ctx: &mut EngineContext<'_>, req: &mut Request) {
        self.invalidate_records(req);

        if req.impure(self.impure).flags & IRSB_OPEN != 0 {
            let impure = req.impure_mut(self.impure);
            impure.flags &= !(IRSB_OPEN | IRSB_SINGULAR_PROCESSED);
            self.next.close(ctx, req);
        }
    }

    fn refetch_record(&self, ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<bool> {
        self.next.refetch_record(ctx, req)
    }

    fn lock_record(
        &self,
        ctx: &mut EngineContext<'_>,
        req: &mut Request,
        skip_locked: bool,
    ) -> Result<WriteLockResult> {
        self.next.lock_record(ctx, req, skip_locked)
    }

    fn internal_get_plan(&self, entry: &mut PlanEntry, level: u32, recurse: bool) {
        entry.description = "Singularity Check".to_string();

        if recurse {
            entry.children.push(self.next.get_plan(level + 1, recurse));
        }
    }

    fn legacy_plan(&self, out: &mut String, level: u32) {
        self.next.legacy_plan(out, level);
    }

    fn find_used_streams(&self, streams: &mut Vec<StreamId>, expand_all: bool) {
        self.next.find_used_streams(streams, expand_all);
    }

    fn invalidate_records(&self, req: &mut Request) {
        self.next.invalidate_records(req);
    }

    fn null_records(&self, req: &mut Request) {
        self.next.null_records(req);
    }

    fn mark_recursive(&mut self) {
        self.next.mark_recursive();
    }
}
