// Profiler backend plugin surface
//
// The manager drives a pluggable backend: it defines statements, cursors
// and record sources incrementally as queries execute and reports timing
// events; the backend decides what to persist and how. Plugin failures are
// logged rather than raised, except when `start_session` itself fails.

use crate::engine::Attachment;
use crate::error::{Error, Result};
use crate::exec::RequestStats;
use chrono::{DateTime, FixedOffset};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Feature flags a plugin session advertises. The manager skips work the
/// backend does not want.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionFlags(pub u32);

impl SessionFlags {
    /// The backend wants per-record-source open/fetch timing events.
    pub const RECORD_SOURCE_EVENTS: SessionFlags = SessionFlags(0x01);

    pub fn contains(&self, other: SessionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(&self, other: SessionFlags) -> SessionFlags {
        SessionFlags(self.0 | other.0)
    }
}

/// Which access-path entry point an elapsed-time event was measured around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSourceEvent {
    Open,
    GetRecord,
}

impl RecordSourceEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordSourceEvent::Open => "OPEN",
            RecordSourceEvent::GetRecord => "GET_RECORD",
        }
    }
}

impl std::fmt::Debug for dyn ProfilerPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ProfilerPlugin")
    }
}

/// A profiler backend. One instance per (attachment, plugin name), kept in
/// the manager's active-plugin map for as long as any session references it.
pub trait ProfilerPlugin: Send + Sync {
    /// Called once when the plugin is first loaded for an attachment.
    /// `ticks_frequency` is the resolution of all elapsed-tick values.
    fn init(&self, attachment: &Arc<Attachment>, ticks_frequency: u64) -> anyhow::Result<()>;

    fn start_session(
        &self,
        description: &str,
        options: &str,
        timestamp: DateTime<FixedOffset>,
    ) -> anyhow::Result<Box<dyn ProfilerSession>>;

    /// Persist whatever the backend has buffered.
    fn flush(&self) -> anyhow::Result<()>;
}

/// The backend's per-session handle, receiving definition and timing
/// callbacks.
pub trait ProfilerSession: Send {
    fn id(&self) -> i64;

    fn flags(&self) -> SessionFlags;

    #[allow(clippy::too_many_arguments)]
    fn define_statement(
        &mut self,
        statement_id: i64,
        parent_statement_id: i64,
        kind: &str,
        package_name: Option<&str>,
        routine_name: Option<&str>,
        sql_text: &str,
    ) -> anyhow::Result<()>;

    fn define_cursor(
        &mut self,
        statement_id: i64,
        cursor_id: u32,
        name: Option<&str>,
        line: u32,
        column: u32,
    ) -> anyhow::Result<()>;

    #[allow(clippy::too_many_arguments)]
    fn define_record_source(
        &mut self,
        statement_id: i64,
        cursor_id: u32,
        sequence: u32,
        level: u32,
        description: &str,
        parent_sequence: u32,
    ) -> anyhow::Result<()>;

    #[allow(clippy::too_many_arguments)]
    fn on_record_source_event(
        &mut self,
        statement_id: i64,
        request_id: i64,
        cursor_id: u32,
        rec_source_id: u32,
        event: RecordSourceEvent,
        elapsed_ticks: u64,
    ) -> anyhow::Result<()>;

    fn on_request_finish(
        &mut self,
        statement_id: i64,
        request_id: i64,
        timestamp: DateTime<FixedOffset>,
        stats: &RequestStats,
    ) -> anyhow::Result<()>;

    fn finish(&mut self, timestamp: DateTime<FixedOffset>) -> anyhow::Result<()>;

    fn cancel(&mut self) -> anyhow::Result<()>;

    fn flush(&mut self) -> anyhow::Result<()>;
}

pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn ProfilerPlugin> + Send + Sync>;

/// Named registry of backend factories. A factory runs once per attachment
/// that loads the plugin; the produced instance then lives in that
/// attachment's active-plugin map.
pub struct PluginRegistry {
    factories: Mutex<HashMap<String, PluginFactory>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            factories: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        factory: impl Fn() -> Arc<dyn ProfilerPlugin> + Send + Sync + 'static,
    ) {
        self.factories
            .lock()
            .unwrap()
            .insert(name.into(), Arc::new(factory));
    }

    pub fn load(&self, name: &str) -> Result<Arc<dyn ProfilerPlugin>> {
        let factory = self
            .factories
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PluginNotFound(name.to_string()))?;
        Ok(factory())
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
