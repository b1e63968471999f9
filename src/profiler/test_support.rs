// Test doubles shared by the profiler and ipc test suites

use super::plugin::{ProfilerPlugin, ProfilerSession, RecordSourceEvent, SessionFlags};
use crate::engine::{Attachment, Database};
use crate::exec::RequestStats;
use anyhow::anyhow;
use chrono::{DateTime, FixedOffset};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// Opt-in log output while debugging test runs:
/// `RUST_LOG=dbspy=debug cargo test -- --nocapture`.
pub(crate) fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Every observable call a backend receives, in order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Init {
        frequency: u64,
    },
    StartSession {
        session_id: i64,
        description: String,
        options: String,
    },
    DefineStatement {
        statement_id: i64,
        parent_statement_id: i64,
        kind: String,
        routine_name: Option<String>,
    },
    DefineCursor {
        statement_id: i64,
        cursor_id: u32,
        name: Option<String>,
        line: u32,
        column: u32,
    },
    DefineRecordSource {
        statement_id: i64,
        cursor_id: u32,
        sequence: u32,
        level: u32,
        description: String,
        parent_sequence: u32,
    },
    RecordSourceEvent {
        request_id: i64,
        rec_source_id: u32,
        event: &'static str,
    },
    RequestFinish {
        statement_id: i64,
        request_id: i64,
        records_fetched: u64,
    },
    Finish {
        session_id: i64,
    },
    Cancel {
        session_id: i64,
    },
    Flush,
}

/// A backend that records everything it is told. Clones share the call log
/// and the session-id counter.
#[derive(Clone)]
pub(crate) struct RecordingPlugin {
    calls: Arc<Mutex<Vec<Call>>>,
    next_session_id: Arc<AtomicI64>,
    flags: SessionFlags,
}

impl RecordingPlugin {
    pub(crate) fn new() -> Self {
        Self::with_flags(SessionFlags::RECORD_SOURCE_EVENTS)
    }

    pub(crate) fn with_flags(flags: SessionFlags) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            next_session_id: Arc::new(AtomicI64::new(0)),
            flags,
        }
    }

    /// Register this backend in the database's plugin registry under `name`.
    pub(crate) fn install(&self, database: &Arc<Database>, name: &str) {
        let plugin = self.clone();
        database
            .plugins()
            .register(name, move || Arc::new(plugin.clone()) as Arc<dyn ProfilerPlugin>);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| matches(c)).count()
    }
}

impl ProfilerPlugin for RecordingPlugin {
    fn init(&self, _attachment: &Arc<Attachment>, ticks_frequency: u64) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Call::Init {
            frequency: ticks_frequency,
        });
        Ok(())
    }

    fn start_session(
        &self,
        description: &str,
        options: &str,
        _timestamp: DateTime<FixedOffset>,
    ) -> anyhow::Result<Box<dyn ProfilerSession>> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().unwrap().push(Call::StartSession {
            session_id,
            description: description.to_string(),
            options: options.to_string(),
        });
        Ok(Box::new(RecordingSession {
            id: session_id,
            calls: self.calls.clone(),
            flags: self.flags,
        }))
    }

    fn flush(&self) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Call::Flush);
        Ok(())
    }
}

struct RecordingSession {
    id: i64,
    calls: Arc<Mutex<Vec<Call>>>,
    flags: SessionFlags,
}

impl ProfilerSession for RecordingSession {
    fn id(&self) -> i64 {
        self.id
    }

    fn flags(&self) -> SessionFlags {
        self.flags
    }

    fn define_statement(
        &mut self,
        statement_id: i64,
        parent_statement_id: i64,
        kind: &str,
        _package_name: Option<&str>,
        routine_name: Option<&str>,
        _sql_text: &str,
    ) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Call::DefineStatement {
            statement_id,
            parent_statement_id,
            kind: kind.to_string(),
            routine_name: routine_name.map(str::to_string),
        });
        Ok(())
    }

    fn define_cursor(
        &mut self,
        statement_id: i64,
        cursor_id: u32,
        name: Option<&str>,
        line: u32,
        column: u32,
    ) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Call::DefineCursor {
            statement_id,
            cursor_id,
            name: name.map(str::to_string),
            line,
            column,
        });
        Ok(())
    }

    fn define_record_source(
        &mut self,
        statement_id: i64,
        cursor_id: u32,
        sequence: u32,
        level: u32,
        description: &str,
        parent_sequence: u32,
    ) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Call::DefineRecordSource {
            statement_id,
            cursor_id,
            sequence,
            level,
            description: description.to_string(),
            parent_sequence,
        });
        Ok(())
    }

    fn on_record_source_event(
        &mut self,
        _statement_id: i64,
        request_id: i64,
        _cursor_id: u32,
        rec_source_id: u32,
        event: RecordSourceEvent,
        _elapsed_ticks: u64,
    ) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Call::RecordSourceEvent {
            request_id,
            rec_source_id,
            event: event.as_str(),
        });
        Ok(())
    }

    fn on_request_finish(
        &mut self,
        statement_id: i64,
        request_id: i64,
        _timestamp: DateTime<FixedOffset>,
        stats: &RequestStats,
    ) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Call::RequestFinish {
            statement_id,
            request_id,
            records_fetched: stats.records_fetched,
        });
        Ok(())
    }

    fn finish(&mut self, _timestamp: DateTime<FixedOffset>) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Call::Finish {
            session_id: self.id,
        });
        Ok(())
    }

    fn cancel(&mut self) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Call::Cancel {
            session_id: self.id,
        });
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A backend whose `start_session` always fails.
pub(crate) struct FailingPlugin;

impl ProfilerPlugin for FailingPlugin {
    fn init(&self, _attachment: &Arc<Attachment>, _ticks_frequency: u64) -> anyhow::Result<()> {
        Ok(())
    }

    fn start_session(
        &self,
        _description: &str,
        _options: &str,
        _timestamp: DateTime<FixedOffset>,
    ) -> anyhow::Result<Box<dyn ProfilerSession>> {
        Err(anyhow!("backend refused to start"))
    }

    fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
