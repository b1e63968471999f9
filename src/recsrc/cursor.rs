// Cursor: the named wrapper around a whole access-path subtree
//
// Forward-only iteration with a BOS/POSITIONED/EOS state machine kept in the
// request's impure slot. The cursor carries the name/line/column metadata
// the profiler reports when it defines the cursor to the backend.

use super::{PlanEntry, RecordSource};
use crate::engine::EngineContext;
use crate::error::{Error, Result};
use crate::exec::request::IRSB_OPEN;
use crate::exec::{CursorId, Request};

const STATE_BOS: usize = 0;
const STATE_POSITIONED: usize = 1;
const STATE_EOS: usize = 2;

pub struct Cursor {
    cursor_id: CursorId,
    root: Box<dyn RecordSource>,
    name: Option<String>,
    line: u32,
    column: u32,
    state_slot: usize,
}

impl Cursor {
    pub(crate) fn new(
        cursor_id: CursorId,
        root: Box<dyn RecordSource>,
        name: Option<String>,
        line: u32,
        column: u32,
        state_slot: usize,
    ) -> Self {
        Self {
            cursor_id,
            root,
            name,
            line,
            column,
            state_slot,
        }
    }

    pub fn cursor_id(&self) -> CursorId {
        self.cursor_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    pub fn root(&self) -> &dyn RecordSource {
        self.root.as_ref()
    }

    pub fn open(&self, ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<()> {
        {
            let impure = req.impure_mut(self.state_slot);
            impure.flags |= IRSB_OPEN;
            impure.arg = STATE_BOS;
        }
        self.root.open(ctx, req)
    }

    pub fn close(&self, ctx: &mut EngineContext<'_>, req: &mut Request) {
        if req.impure(self.state_slot).flags & IRSB_OPEN != 0 {
            req.impure_mut(self.state_slot).flags &= !IRSB_OPEN;
            self.root.close(ctx, req);
        }
    }

    pub fn fetch_next(&self, ctx: &mut EngineContext<'_>, req: &mut Request) -> Result<bool> {
        self.check_state(req)?;

        if req.impure(self.state_slot).arg == STATE_EOS {
            return Ok(false);
        }

        if self.root.get_record(ctx, req)? {
            req.impure_mut(self.state_slot).arg = STATE_POSITIONED;
            req.stats.records_fetched += 1;
            Ok(true)
        } else {
            req.impure_mut(self.state_slot).arg = STATE_EOS;
            Ok(false)
        }
    }

    fn check_state(&self, req: &Request) -> Result<()> {
        if req.impure(self.state_slot).flags & IRSB_OPEN == 0 {
            return Err(Error::CursorNotOpen);
        }
        Ok(())
    }

    /// Detailed tree rendering or the compact single-line form.
    pub fn print_plan(&self, detailed: bool) -> String {
        if detailed {
            self.plan().as_string()
        } else {
            let mut out = String::new();
            self.root.legacy_plan(&mut out, 0);
            out
        }
    }

    pub fn plan(&self) -> PlanEntry {
        self.root.get_plan(0, true)
    }
}
