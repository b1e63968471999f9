// Built-in profiler backend - JSON Lines output
//
// The "default" plugin. Definition and timing callbacks are buffered in
// memory and appended to one JSONL file per session on flush:
//   <data_dir>/profile-session-<id>.jsonl
// One JSON object per line keeps the output greppable and jq-friendly.

use super::plugin::{ProfilerPlugin, ProfilerSession, RecordSourceEvent, SessionFlags};
use crate::engine::Attachment;
use crate::exec::RequestStats;
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// One line of profile output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProfileRecord {
    SessionStart {
        session_id: i64,
        description: String,
        options: String,
        /// Resolution of every elapsed_ticks value in this session.
        ticks_frequency: u64,
        timestamp: DateTime<FixedOffset>,
    },
    Statement {
        session_id: i64,
        statement_id: i64,
        parent_statement_id: i64,
        kind: String,
        package_name: Option<String>,
        routine_name: Option<String>,
        sql_text: String,
    },
    Cursor {
        session_id: i64,
        statement_id: i64,
        cursor_id: u32,
        name: Option<String>,
        line: u32,
        column: u32,
    },
    RecordSource {
        session_id: i64,
        statement_id: i64,
        cursor_id: u32,
        sequence: u32,
        level: u32,
        description: String,
        parent_sequence: u32,
    },
    RecordSourceEvent {
        session_id: i64,
        statement_id: i64,
        request_id: i64,
        cursor_id: u32,
        rec_source_id: u32,
        event: String,
        elapsed_ticks: u64,
    },
    RequestFinish {
        session_id: i64,
        statement_id: i64,
        request_id: i64,
        timestamp: DateTime<FixedOffset>,
        records_fetched: u64,
    },
    SessionFinish {
        session_id: i64,
        timestamp: DateTime<FixedOffset>,
    },
}

impl ProfileRecord {
    fn session_id(&self) -> i64 {
        match self {
            ProfileRecord::SessionStart { session_id, .. }
            | ProfileRecord::Statement { session_id, .. }
            | ProfileRecord::Cursor { session_id, .. }
            | ProfileRecord::RecordSource { session_id, .. }
            | ProfileRecord::RecordSourceEvent { session_id, .. }
            | ProfileRecord::RequestFinish { session_id, .. }
            | ProfileRecord::SessionFinish { session_id, .. } => *session_id,
        }
    }
}

#[derive(Debug, Default)]
struct JsonlState {
    pending: Vec<ProfileRecord>,
    next_session_id: i64,
    ticks_frequency: u64,
}

/// The built-in JSON Lines backend.
pub struct JsonlPlugin {
    data_dir: PathBuf,
    state: Arc<Mutex<JsonlState>>,
}

impl JsonlPlugin {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            state: Arc::new(Mutex::new(JsonlState {
                pending: Vec::new(),
                next_session_id: 0,
                ticks_frequency: 0,
            })),
        }
    }

    /// Path of one session's output file.
    pub fn session_file(&self, session_id: i64) -> PathBuf {
        self.data_dir
            .join(format!("profile-session-{}.jsonl", session_id))
    }

    fn write_records(&self, records: &[ProfileRecord]) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir).context("Failed to create profile directory")?;

        for record in records {
            let path = self.session_file(record.session_id());
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .context("Failed to open profile file")?;

            let json = serde_json::to_string(record).context("Failed to serialize record")?;
            writeln!(file, "{}", json).context("Failed to write profile record")?;
        }

        Ok(())
    }
}

impl ProfilerPlugin for JsonlPlugin {
    fn init(&self, _attachment: &Arc<Attachment>, ticks_frequency: u64) -> Result<()> {
        self.state.lock().unwrap().ticks_frequency = ticks_frequency;
        Ok(())
    }

    fn start_session(
        &self,
        description: &str,
        options: &str,
        timestamp: DateTime<FixedOffset>,
    ) -> Result<Box<dyn ProfilerSession>> {
        let mut state = self.state.lock().unwrap();
        state.next_session_id += 1;
        let id = state.next_session_id;
        let ticks_frequency = state.ticks_frequency;

        state.pending.push(ProfileRecord::SessionStart {
            session_id: id,
            description: description.to_string(),
            options: options.to_string(),
            ticks_frequency,
            timestamp,
        });

        Ok(Box::new(JsonlSession {
            id,
            state: self.state.clone(),
        }))
    }

    fn flush(&self) -> Result<()> {
        let records: Vec<ProfileRecord> = {
            let mut state = self.state.lock().unwrap();
            state.pending.drain(..).collect()
        };

        if records.is_empty() {
            return Ok(());
        }

        tracing::debug!("flushing {} profile records", records.len());
        self.write_records(&records)
    }
}

struct JsonlSession {
    id: i64,
    state: Arc<Mutex<JsonlState>>,
}

impl JsonlSession {
    fn push(&self, record: ProfileRecord) {
        self.state.lock().unwrap().pending.push(record);
    }
}

impl ProfilerSession for JsonlSession {
    fn id(&self) -> i64 {
        self.id
    }

    fn flags(&self) -> SessionFlags {
        SessionFlags::RECORD_SOURCE_EVENTS
    }

    fn define_statement(
        &mut self,
        statement_id: i64,
        parent_statement_id: i64,
        kind: &str,
        package_name: Option<&str>,
        routine_name: Option<&str>,
        sql_text: &str,
    ) -> Result<()> {
        self.push(ProfileRecord::Statement {
            session_id: self.id,
            statement_id,
            parent_statement_id,
            kind: kind.to_string(),
            package_name: package_name.map(str::to_string),
            routine_name: routine_name.map(str::to_string),
            sql_text: sql_text.to_string(),
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
    ) -> Result<()> {
        self.push(ProfileRecord::Cursor {
            session_id: self.id,
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
    ) -> Result<()> {
        self.push(ProfileRecord::RecordSource {
            session_id: self.id,
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
        statement_id: i64,
        request_id: i64,
        cursor_id: u32,
        rec_source_id: u32,
        event: RecordSourceEvent,
        elapsed_ticks: u64,
    ) -> Result<()> {
        self.push(ProfileRecord::RecordSourceEvent {
            session_id: self.id,
            statement_id,
            request_id,
            cursor_id,
            rec_source_id,
            event: event.as_str().to_string(),
            elapsed_ticks,
        });
        Ok(())
    }

    fn on_request_finish(
        &mut self,
        statement_id: i64,
        request_id: i64,
        timestamp: DateTime<FixedOffset>,
        stats: &RequestStats,
    ) -> Result<()> {
        self.push(ProfileRecord::RequestFinish {
            session_id: self.id,
            statement_id,
            request_id,
            timestamp,
            records_fetched: stats.records_fetched,
        });
        Ok(())
    }

    fn finish(&mut self, timestamp: DateTime<FixedOffset>) -> Result<()> {
        self.push(ProfileRecord::SessionFinish {
            session_id: self.id,
            timestamp,
        });
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        // Cancelled sessions leave nothing behind.
        let mut state = self.state.lock().unwrap();
        let id = self.id;
        state.pending.retain(|record| record.session_id() != id);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        // Buffering is plugin-wide; the plugin-level flush does the work.
        Ok(())
    }
}
