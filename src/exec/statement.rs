// Compiled statements and the compiler scratch area
//
// A statement is a compiled query, routine, trigger or anonymous block. It
// owns the cursors compiled into it and remembers how many streams and
// impure slots its access paths allocated, so each request can size its
// run-time state up front. Statements form a parent chain (a trigger fired
// by a procedure called from a query), which the profiler walks when
// defining statements to the backend plugin.

use super::{CursorId, RecSourceId, StatementId, StreamId};
use crate::recsrc::{Cursor, RecordSource};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Procedure,
    Function,
    Trigger,
    Block,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Procedure => "PROCEDURE",
            StatementKind::Function => "FUNCTION",
            StatementKind::Trigger => "TRIGGER",
            StatementKind::Block => "BLOCK",
        }
    }
}

/// Compile-time allocator for cursor ids, record-source ids, streams and
/// impure slots. One scratch lives for the duration of one statement build.
#[derive(Debug)]
pub struct CompilerScratch {
    current_cursor_id: CursorId,
    next_cursor_id: CursorId,
    next_rec_source_id: RecSourceId,
    next_stream: StreamId,
    next_impure: usize,
}

impl CompilerScratch {
    pub fn new() -> Self {
        Self {
            current_cursor_id: 0,
            next_cursor_id: 1,
            next_rec_source_id: 1,
            next_stream: 0,
            next_impure: 0,
        }
    }

    /// Start compiling a new cursor; nodes built until the next call belong
    /// to it.
    pub fn begin_cursor(&mut self) -> CursorId {
        self.current_cursor_id = self.next_cursor_id;
        self.next_cursor_id += 1;
        self.current_cursor_id
    }

    pub fn current_cursor_id(&self) -> CursorId {
        self.current_cursor_id
    }

    pub fn alloc_rec_source_id(&mut self) -> RecSourceId {
        let id = self.next_rec_source_id;
        self.next_rec_source_id += 1;
        id
    }

    pub fn alloc_stream(&mut self) -> StreamId {
        let stream = self.next_stream;
        self.next_stream += 1;
        stream
    }

    pub fn alloc_impure(&mut self) -> usize {
        let slot = self.next_impure;
        self.next_impure += 1;
        slot
    }

    pub fn stream_count(&self) -> usize {
        self.next_stream
    }

    pub fn impure_count(&self) -> usize {
        self.next_impure
    }
}

impl Default for CompilerScratch {
    fn default() -> Self {
        Self::new()
    }
}

/// A compiled statement. Immutable once built; shared between requests.
pub struct Statement {
    id: StatementId,
    kind: StatementKind,
    package_name: Option<String>,
    routine_name: Option<String>,
    sql_text: Option<String>,
    parent: Option<Arc<Statement>>,
    cursors: Vec<Arc<Cursor>>,
    stream_count: usize,
    impure_count: usize,
}

impl Statement {
    pub fn id(&self) -> StatementId {
        self.id
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn package_name(&self) -> Option<&str> {
        self.package_name.as_deref()
    }

    pub fn routine_name(&self) -> Option<&str> {
        self.routine_name.as_deref()
    }

    pub fn sql_text(&self) -> Option<&str> {
        self.sql_text.as_deref()
    }

    pub fn parent(&self) -> Option<&Arc<Statement>> {
        self.parent.as_ref()
    }

    pub fn cursors(&self) -> &[Arc<Cursor>] {
        &self.cursors
    }

    pub fn cursor_by_id(&self, cursor_id: CursorId) -> Option<&Arc<Cursor>> {
        self.cursors.iter().find(|c| c.cursor_id() == cursor_id)
    }

    pub fn stream_count(&self) -> usize {
        self.stream_count
    }

    pub fn impure_count(&self) -> usize {
        self.impure_count
    }
}

/// Builder producing an immutable statement.
pub struct StatementBuilder {
    id: StatementId,
    kind: StatementKind,
    package_name: Option<String>,
    routine_name: Option<String>,
    sql_text: Option<String>,
    parent: Option<Arc<Statement>>,
    cursors: Vec<Arc<Cursor>>,
    scratch: CompilerScratch,
}

impl StatementBuilder {
    pub fn new(id: StatementId, kind: StatementKind) -> Self {
        Self {
            id,
            kind,
            package_name: None,
            routine_name: None,
            sql_text: None,
            parent: None,
            cursors: Vec::new(),
            scratch: CompilerScratch::new(),
        }
    }

    pub fn package_name(mut self, name: impl Into<String>) -> Self {
        self.package_name = Some(name.into());
        self
    }

    pub fn routine_name(mut self, name: impl Into<String>) -> Self {
        self.routine_name = Some(name.into());
        self
    }

    pub fn sql_text(mut self, text: impl Into<String>) -> Self {
        self.sql_text = Some(text.into());
        self
    }

    pub fn parent(mut self, parent: Arc<Statement>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Compile one cursor into the statement. The closure builds the access
    /// path tree against this statement's scratch area.
    pub fn cursor(
        mut self,
        name: Option<&str>,
        line: u32,
        column: u32,
        build: impl FnOnce(&mut CompilerScratch) -> Box<dyn RecordSource>,
    ) -> Self {
        let cursor_id = self.scratch.begin_cursor();
        let root = build(&mut self.scratch);
        let state_slot = self.scratch.alloc_impure();
        self.cursors.push(Arc::new(Cursor::new(
            cursor_id,
            root,
            name.map(str::to_string),
            line,
            column,
            state_slot,
        )));
        self
    }

    pub fn build(self) -> Arc<Statement> {
        Arc::new(Statement {
            id: self.id,
            kind: self.kind,
            package_name: self.package_name,
            routine_name: self.routine_name,
            sql_text: self.sql_text,
            parent: self.parent,
            cursors: self.cursors,
            stream_count: self.scratch.stream_count(),
            impure_count: self.scratch.impure_count(),
        })
    }
}
