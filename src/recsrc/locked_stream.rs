// Data access: stream locked for write
//
// Every record surfaced by the inner stream is write-locked before it is
// returned. A conflicting lock triggers a refetch-and-retry; a skip-locked
// stream silently drops records somebody else holds.

use super::{AccessPathIds, PlanEntry, RecordSource, WriteLockResult};
use crate::engine::EngineContext;
use crate::error::Result;
use crate::exec::request::IRSB_OPEN;
use crate::exec::{CompilerScratch, Request, StreamId};

pub struct LockedStream {
    ids: AccessPathIds,
    next: Box<dyn RecordSource>,
    skip_locked: bool,
    impure: usize,
}

impl LockedStream {
    pub fn new(scratch: &mut CompilerScratch, next: Box<dyn RecordSource>, skip_locked: bool) -> Self {
        Self {
            ids: AccessPathIds::alloc(scratch),
            next,
            skip_locked,
            impure: scratch.alloc_impure(),
        }
    }
}

impl RecordSource for LockedStream {
    fn ids(&self) -> AccessPathIds {
        self.ids
    }

    fn internal_open(&self, ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<()> {
        req.impure_mut(self.impure).flags |= IRSB_OPEN;
        self.next.open(ctx, req)
    }

    fn internal_get_record(&self, ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<bool> {
        if req.impure(self.impure).flags & IRSB_OPEN == 0 {
            return Ok(false);
        }

        while self.next.get_record(ctx, req)? {
            loop {
                // Attempt to lock the record.
                match self.next.lock_record(ctx, req, self.skip_locked)? {
                    WriteLockResult::Locked => return Ok(true),
                    WriteLockResult::Skipped => break,
                    WriteLockResult::Conflicted => {
                        // Refetch the record and ensure it still fulfils the
                        // search condition.
                        if !self.next.refetch_record(ctx, req)? {
                            break;
                        }
                    }
                }
            }
        }

        Ok(false)
    }

    fn close(&self, ctx: &mut EngineContext<'_>, req: &mut Request) {
        self.invalidate_records(req);

        if req.impure(self.impure).flags & IRSB_OPEN != 0 {
            req.impure_mut(self.impure).flags &= !IRSB_OPEN;
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
        entry.description = "Write Lock".to_string();

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
