// Data access: full outer join
//
// Drains the left argument first, then switches to the right one. Record
// locking through a full outer join is not supported.

use super::{AccessPathIds, PlanEntry, RecordSource, WriteLockResult};
use crate::engine::EngineContext;
use crate::error::{Error, Result};
use crate::exec::request::{IRSB_FIRST, IRSB_OPEN};
use crate::exec::{CompilerScratch, Request, StreamId};

pub struct FullOuterJoin {
    ids: AccessPathIds,
    arg1: Box<dyn RecordSource>,
    arg2: Box<dyn RecordSource>,
    impure: usize,
}

impl FullOuterJoin {
    pub fn new(
        scratch: &mut CompilerScratch,
        arg1: Box<dyn RecordSource>,
        arg2: Box<dyn RecordSource>,
    ) -> Self {
        Self {
            ids: AccessPathIds::alloc(scratch),
            arg1,
            arg2,
            impure: scratch.alloc_impure(),
        }
    }
}

impl RecordSource for FullOuterJoin {
    fn ids(&self) -> AccessPathIds {
        self.ids
    }

    fn internal_open(&self, ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<()> {
        req.impure_mut(self.impure).flags |= IRSB_OPEN | IRSB_FIRST;
        self.arg1.open(ctx, req)
    }

    fn internal_get_record(&self, ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<bool> {
        if req.impure(self.impure).flags & IRSB_OPEN == 0 {
            return Ok(false);
        }

        if req.impure(self.impure).flags & IRSB_FIRST != 0 {
            if self.arg1.get_record(ctx, req)? {
                return Ok(true);
            }

            req.impure_mut(self.impure).flags &= !IRSB_FIRST;
            self.arg1.close(ctx, req);
            self.arg2.open(ctx, req)?;
        }

        self.arg2.get_record(ctx, req)
    }

    fn close(&self, ctx: &mut EngineContext<'_>, req: &mut Request) {
        self.invalidate_records(req);

        let flags = req.impure(self.impure).flags;
        if flags & IRSB_OPEN != 0 {
            req.impure_mut(self.impure).flags &= !IRSB_OPEN;
            if flags & IRSB_FIRST != 0 {
                self.arg1.close(ctx, req);
            } else {
                self.arg2.close(ctx, req);
            }
        }
    }

    fn refetch_record(&self, _ctx: &mut EngineContext<'_>, _req: &mut Request) -> Result<bool> {
        Ok(true)
    }

    fn lock_record(
        &self,
        _ctx: &mut EngineContext<'_>,
        _req: &mut Request,
        _skip_locked: bool,
    ) -> Result<WriteLockResult> {
        Err(Error::RecordLockNotSupported)
    }

    fn internal_get_plan(&self, entry: &mut PlanEntry, level: u32, recurse: bool) {
        entry.description = "Full Outer Join".to_string();

        if recurse {
            entry.children.push(self.arg1.get_plan(level + 1, recurse));
            entry.children.push(self.arg2.get_plan(level + 1, recurse));
        }
    }

    fn legacy_plan(&self, out: &mut String, level: u32) {
        out.push_str("JOIN (");
        self.arg1.legacy_plan(out, level + 1);
        out.push_str(", ");
        self.arg2.legacy_plan(out, level + 1);
        out.push(')');
    }

    fn find_used_streams(&self, streams: &mut Vec<StreamId>, expand_all: bool) {
        self.arg1.find_used_streams(streams, expand_all);
        self.arg2.find_used_streams(streams, expand_all);
    }

    fn invalidate_records(&self, req: &mut Request) {
        self.arg1.invalidate_records(req);
        self.arg2.invalidate_records(req);
    }

    fn null_records(&self, req: &mut Request) {
        self.arg1.null_records(req);
        self.arg2.null_records(req);
    }

    fn mark_recursive(&mut self) {
        self.arg1.mark_recursive();
        self.arg2.mark_recursive();
    }
}
