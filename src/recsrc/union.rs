// Data access: regular union
//
// Marches through its arguments in order, closing each exhausted argument
// and opening the next, mapping whichever argument's record is current into
// the union's own stream.

use super::{AccessPathIds, PlanEntry, RecordSource, WriteLockResult};
use crate::engine::EngineContext;
use crate::error::Result;
use crate::exec::request::IRSB_OPEN;
use crate::exec::{CompilerScratch, Request, StreamId};

pub struct Union {
    ids: AccessPathIds,
    stream: StreamId,
    args: Vec<Box<dyn RecordSource>>,
    arg_streams: Vec<StreamId>,
    impure: usize,
}

impl Union {
    pub fn new(
        scratch: &mut CompilerScratch,
        args: Vec<Box<dyn RecordSource>>,
        arg_streams: Vec<StreamId>,
    ) -> Self {
        assert!(!args.is_empty());
        assert_eq!(args.len(), arg_streams.len());
        Self {
            ids: AccessPathIds::alloc(scratch),
            stream: scratch.alloc_stream(),
            args,
            arg_streams,
            impure: scratch.alloc_impure(),
        }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Map the current argument's record into the union's own stream.
    fn map_current(&self, req: &mut Request, arg: usize) {
        let record = req.stream(self.arg_streams[arg]).record.clone();
        let buffer = req.stream_mut(self.stream);
        buffer.record = record;
        buffer.valid = true;
    }
}

impl RecordSource for Union {
    fn ids(&self) -> AccessPathIds {
        self.ids
    }

    fn internal_open(&self, ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<()> {
        {
            let impure = req.impure_mut(self.impure);
            impure.flags |= IRSB_OPEN;
            impure.arg = 0;
        }
        self.args[0].open(ctx, req)
    }

    fn internal_get_record(&self, ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<bool> {
        if req.impure(self.impure).flags & IRSB_OPEN == 0 {
            req.stream_mut(self.stream).valid = false;
            return Ok(false);
        }

        let mut arg = req.impure(self.impure).arg;

        // March thru the sub-streams looking for a record.
        while !self.args[arg].get_record(ctx, req)? {
            self.args[arg].close(ctx, req);
            arg += 1;
            req.impure_mut(self.impure).arg = arg;
            if arg >= self.args.len() {
                req.stream_mut(self.stream).valid = false;
                return Ok(false);
            }
            self.args[arg].open(ctx, req)?;
        }

        self.map_current(req, arg);
        Ok(true)
    }

    fn close(&self, ctx: &mut EngineContext<'_>, req: &mut Request) {
        self.invalidate_records(req);

        let (open, arg) = {
            let impure = req.impure(self.impure);
            (impure.flags & IRSB_OPEN != 0, impure.arg)
        };

        if open {
            req.impure_mut(self.impure).flags &= !IRSB_OPEN;
            if arg < self.args.len() {
                self.args[arg].close(ctx, req);
            }
        }
    }

    fn refetch_record(&self, ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<bool> {
        let arg = req.impure(self.impure).arg;
        if arg >= self.args.len() {
            return Ok(false);
        }
        self.args[arg].refetch_record(ctx, req)
    }

    fn lock_record(
        &self,
        ctx: &mut EngineContext<'_>,
        req: &mut Request,
        skip_locked: bool,
    ) -> Result<WriteLockResult> {
        let arg = req.impure(self.impure).arg;
        if arg >= self.args.len() {
            return Ok(WriteLockResult::Conflicted);
        }
        self.args[arg].lock_record(ctx, req, skip_locked)
    }

    fn internal_get_plan(&self, entry: &mut PlanEntry, level: u32, recurse: bool) {
        entry.description = if self.args.len() == 1 {
            "Materialize".to_string()
        } else {
            "Union".to_string()
        };

        if recurse {
            for arg in &self.args {
                entry.children.push(arg.get_plan(level + 1, recurse));
            }
        }
    }

    fn legacy_plan(&self, out: &mut String, level: u32) {
        if level == 0 {
            out.push('(');
        }
        for (index, arg) in self.args.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            arg.legacy_plan(out, level + 1);
        }
        if level == 0 {
            out.push(')');
        }
    }

    fn find_used_streams(&self, streams: &mut Vec<StreamId>, expand_all: bool) {
        if !streams.contains(&self.stream) {
            streams.push(self.stream);
        }
        if expand_all {
            for arg in &self.args {
                arg.find_used_streams(streams, expand_all);
            }
        }
    }

    fn invalidate_records(&self, req: &mut Request) {
        req.stream_mut(self.stream).valid = false;
    }

    fn null_records(&self, req: &mut Request) {
        req.stream_mut(self.stream).valid = false;
        req.stream_mut(self.stream).record = None;
    }

    fn mark_recursive(&mut self) {
        for arg in &mut self.args {
            arg.mark_recursive();
        }
    }
}
