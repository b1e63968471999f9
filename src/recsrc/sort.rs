// Data access: sorted stream
//
// Drains its input on open, buffering the input stream's rows in the
// request's impure slot, and replays them in key order.

use super::{AccessPathIds, PlanEntry, RecordSource};
use crate::engine::EngineContext;
use crate::error::Result;
use crate::exec::request::IRSB_OPEN;
use crate::exec::{CompilerScratch, Request, StreamId, Value};

pub struct Sort {
    ids: AccessPathIds,
    next: Box<dyn RecordSource>,
    /// Stream the inner node materializes records into.
    in_stream: StreamId,
    stream: StreamId,
    key_column: usize,
    impure: usize,
}

impl Sort {
    pub fn new(
        scratch: &mut CompilerScratch,
        next: Box<dyn RecordSource>,
        in_stream: StreamId,
        key_column: usize,
    ) -> Self {
        Self {
            ids: AccessPathIds::alloc(scratch),
            next,
            in_stream,
            stream: scratch.alloc_stream(),
            key_column,
            impure: scratch.alloc_impure(),
        }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }
}

impl RecordSource for Sort {
    fn ids(&self) -> AccessPathIds {
        self.ids
    }

    fn internal_open(&self, ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<()> {
        self.next.open(ctx, req)?;

        let mut rows = Vec::new();
        while self.next.get_record(ctx, req)? {
            if let Some(row) = req.stream(self.in_stream).record.clone() {
                rows.push(row);
            }
        }

        let key = self.key_column;
        rows.sort_by(|a, b| {
            let left = a.get(key).unwrap_or(&Value::Null);
            let right = b.get(key).unwrap_or(&Value::Null);
            left.compare(right)
        });

        let impure = req.impure_mut(self.impure);
        impure.flags |= IRSB_OPEN;
        impure.position = 0;
        impure.rows = rows;
        Ok(())
    }

    fn internal_get_record(&self, _ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<bool> {
        if req.impure(self.impure).flags & IRSB_OPEN == 0 {
            req.stream_mut(self.stream).valid = false;
            return Ok(false);
        }

        let position = req.impure(self.impure).position;
        let row = match req.impure(self.impure).rows.get(position) {
            Some(row) => row.clone(),
            None => {
                req.stream_mut(self.stream).valid = false;
                return Ok(false);
            }
        };

        req.impure_mut(self.impure).position = position + 1;
        let buffer = req.stream_mut(self.stream);
        buffer.record = Some(row);
        buffer.valid = true;
        Ok(true)
    }

    fn close(&self, ctx: &mut EngineContext<'_>, req: &mut Request) {
        self.invalidate_records(req);

        if req.impure(self.impure).flags & IRSB_OPEN != 0 {
            let impure = req.impure_mut(self.impure);
            impure.flags &= !IRSB_OPEN;
            impure.rows.clear();
            self.next.close(ctx, req);
        }
    }

    fn internal_get_plan(&self, entry: &mut PlanEntry, level: u32, recurse: bool) {
        entry.description = "Sort".to_string();

        if recurse {
            entry.children.push(self.next.get_plan(level + 1, recurse));
        }
    }

    fn legacy_plan(&self, out: &mut String, level: u32) {
        out.push_str("SORT (");
        self.next.legacy_plan(out, level + 1);
        out.push(')');
    }

    fn find_used_streams(&self, streams: &mut Vec<StreamId>, expand_all: bool) {
        if !streams.contains(&self.stream) {
            streams.push(self.stream);
        }
        if expand_all {
            self.next.find_used_streams(streams, expand_all);
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
        self.next.mark_recursive();
    }
}
