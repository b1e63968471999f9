// Data access: full table scan over the in-memory row store

use super::{print_name, AccessPathIds, PlanEntry, RecordSource, WriteLockResult};
use crate::engine::EngineContext;
use crate::error::Result;
use crate::exec::{CompilerScratch, Request, StreamId, Table, Value};
use crate::exec::request::IRSB_OPEN;
use std::sync::Arc;

pub struct TableScan {
    ids: AccessPathIds,
    table: Arc<Table>,
    alias: Option<String>,
    stream: StreamId,
    impure: usize,
    recursive: bool,
}

impl TableScan {
    pub fn new(scratch: &mut CompilerScratch, table: Arc<Table>, alias: Option<&str>) -> Self {
        Self {
            ids: AccessPathIds::alloc(scratch),
            table,
            alias: alias.map(str::to_string),
            stream: scratch.alloc_stream(),
            impure: scratch.alloc_impure(),
            recursive: false,
        }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }
}

impl RecordSource for TableScan {
    fn ids(&self) -> AccessPathIds {
        self.ids
    }

    fn internal_open(&self, _ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<()> {
        let impure = req.impure_mut(self.impure);
        impure.flags |= IRSB_OPEN;
        impure.position = 0;
        Ok(())
    }

    fn internal_get_record(&self, _ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<bool> {
        let open = req.impure(self.impure).flags & IRSB_OPEN != 0;
        if !open {
            req.stream_mut(self.stream).valid = false;
            return Ok(false);
        }

        let position = req.impure(self.impure).position;
        if position >= self.table.rows().len() {
            req.stream_mut(self.stream).valid = false;
            return Ok(false);
        }

        let row = self.table.rows()[position].clone();
        {
            let impure = req.impure_mut(self.impure);
            impure.position = position + 1;
            // Remember the row index the stream is positioned on for
            // lock_record.
            impure.arg = position;
        }
        let buffer = req.stream_mut(self.stream);
        buffer.record = Some(row);
        buffer.valid = true;
        Ok(true)
    }

    fn close(&self, _ctx: &mut EngineContext<'_>, req: &mut Request) {
        req.stream_mut(self.stream).valid = false;
        req.impure_mut(self.impure).flags &= !IRSB_OPEN;
    }

    fn lock_record(
        &self,
        _ctx: &mut EngineContext<'_>,
        req: &mut Request,
        skip_locked: bool,
    ) -> Result<WriteLockResult> {
        let index = req.impure(self.impure).arg;
        if self.table.try_lock_row(index) {
            Ok(WriteLockResult::Locked)
        } else if skip_locked {
            Ok(WriteLockResult::Skipped)
        } else {
            Ok(WriteLockResult::Conflicted)
        }
    }

    fn internal_get_plan(&self, entry: &mut PlanEntry, _level: u32, _recurse: bool) {
        entry.description = format!(
            "Table {} Full Scan",
            print_name(self.table.name(), self.alias.as_deref())
        );
    }

    fn legacy_plan(&self, out: &mut String, _level: u32) {
        out.push_str(self.alias.as_deref().unwrap_or(self.table.name()));
        out.push_str(" NATURAL");
    }

    fn find_used_streams(&self, streams: &mut Vec<StreamId>, _expand_all: bool) {
        if !streams.contains(&self.stream) {
            streams.push(self.stream);
        }
    }

    fn invalidate_records(&self, req: &mut Request) {
        req.stream_mut(self.stream).valid = false;
    }

    fn null_records(&self, req: &mut Request) {
        let buffer = req.stream_mut(self.stream);
        buffer.valid = false;
        buffer.record = Some(vec![Value::Null; self.table.width()]);
    }

    fn mark_recursive(&mut self) {
        self.recursive = true;
    }
}
