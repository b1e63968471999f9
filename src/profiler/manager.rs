// Profiler manager - per-attachment profiling state
//
// One manager per attachment, created lazily on first use and owned by the
// attachment's engine state. It holds at most one session, the map of
// active backend plugins, the pause flag that suppresses the observer hooks
// during the manager's own plugin callouts, and the re-arming flush timer.
//
// The pause flag is the reentrancy primitive: `start_session` and `flush`
// can reach plugin code that itself traverses hooked access paths, so both
// run under `with_paused`, and the hooks treat paused as "skip timing, skip
// definition work".

use super::plugin::{ProfilerPlugin, ProfilerSession, RecordSourceEvent, SessionFlags};
use crate::engine::{performance_frequency, Attachment, FlushTimer};
use crate::error::{Error, Result};
use crate::exec::{CursorId, RecSourceId, Request, StatementId};
use crate::ipc::listener::ProfilerListener;
use crate::recsrc::AccessPathIds;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Largest accepted flush interval, in seconds: the timer keeps deadlines
/// with millisecond resolution in 32 bits.
pub const MAX_FLUSH_INTERVAL: i64 = (u32::MAX / 1_000) as i64;

/// What one session has already reported to the plugin about a statement.
#[derive(Debug, Default)]
struct StatementProfile {
    defined_cursors: HashSet<CursorId>,
    rec_source_sequence: HashMap<RecSourceId, u32>,
    cursor_next_sequence: HashMap<CursorId, u32>,
}

/// The current profiler session.
struct Session {
    plugin_session: Box<dyn ProfilerSession>,
    plugin: Arc<dyn ProfilerPlugin>,
    flags: SessionFlags,
    statements: HashMap<StatementId, StatementProfile>,
    requests: HashSet<u64>,
}

pub struct ProfilerManager {
    attachment: Weak<Attachment>,
    current_session: Option<Session>,
    active_plugins: HashMap<String, Arc<dyn ProfilerPlugin>>,
    paused: bool,
    current_flush_interval: u32,
    flush_timer: FlushTimer,
    pub(crate) listener: Option<ProfilerListener>,
}

impl ProfilerManager {
    pub(crate) fn new(attachment: &Arc<Attachment>) -> Result<Self> {
        let weak = Arc::downgrade(attachment);
        let flush_timer = FlushTimer::spawn(
            format!("profiler-flush-{}", attachment.id()),
            move || {
                let Some(attachment) = weak.upgrade() else {
                    return;
                };
                let mut ctx = attachment.enter();
                if let Some(profiler) = ctx.profiler_opt() {
                    profiler.flush(false);
                    profiler.update_flush_timer(false);
                }
            },
        )
        .map_err(Error::Thread)?;

        Ok(Self {
            attachment: Arc::downgrade(attachment),
            current_session: None,
            active_plugins: HashMap::new(),
            paused: false,
            current_flush_interval: 0,
            flush_timer,
            listener: None,
        })
    }

    /// Blocking-notification entry point: lazily spawn the listener in the
    /// target attachment and release its listener lock so the requester's
    /// shared lock can be granted. Notification context cannot raise, so
    /// every failure is swallowed.
    pub(crate) fn blocking_ast(attachment: &Weak<Attachment>) {
        if let Err(error) = Self::listener_ast(attachment) {
            tracing::debug!("profiler listener notification failed: {}", error);
        }
    }

    fn listener_ast(attachment: &Weak<Attachment>) -> Result<()> {
        let Some(attachment) = attachment.upgrade() else {
            return Ok(());
        };
        let database = attachment.database()?;

        {
            let mut ctx = attachment.enter();
            let profiler = ctx.profiler()?;
            if profiler.listener.is_none() {
                profiler.listener = Some(ProfilerListener::spawn(&attachment)?);
            }
        }

        database
            .lock_manager()
            .release_listener_exclusive(attachment.id());
        Ok(())
    }

    fn attachment(&self) -> Result<Arc<Attachment>> {
        self.attachment.upgrade().ok_or(Error::AttachmentShutdown)
    }

    /// Run `f` with the hooks suppressed, restoring the previous pause state
    /// on the way out.
    fn with_paused<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = self.paused;
        self.paused = true;
        let result = f(self);
        self.paused = saved;
        result
    }

    fn check_flush_interval(interval: i32) -> Result<()> {
        let interval = interval as i64;
        if !(0..=MAX_FLUSH_INTERVAL).contains(&interval) {
            return Err(Error::InvalidFlushInterval(interval));
        }
        Ok(())
    }

    /// Is there a session that wants to observe execution right now?
    pub fn is_active(&self) -> bool {
        self.current_session.is_some() && !self.paused
    }

    pub fn session_id(&self) -> Option<i64> {
        self.current_session
            .as_ref()
            .map(|session| session.plugin_session.id())
    }

    /// Start a session against `plugin_name`, finishing any current session
    /// first. Plugin errors raised here propagate to the caller.
    pub fn start_session(
        &mut self,
        flush_interval: Option<i32>,
        plugin_name: &str,
        description: &str,
        options: &str,
    ) -> Result<i64> {
        if let Some(interval) = flush_interval {
            Self::check_flush_interval(interval)?;
        }

        let session_id = self.with_paused(|profiler| -> Result<i64> {
            let attachment = profiler.attachment()?;
            let database = attachment.database()?;
            let timestamp = attachment.current_timestamp();

            if let Some(mut session) = profiler.current_session.take() {
                session.plugin_session.finish(timestamp)?;
            }

            let plugin = match profiler.active_plugins.get(plugin_name) {
                Some(plugin) => plugin.clone(),
                None => {
                    let plugin = database.plugins().load(plugin_name)?;
                    plugin.init(&attachment, performance_frequency())?;
                    profiler
                        .active_plugins
                        .insert(plugin_name.to_string(), plugin.clone());
                    plugin
                }
            };

            let plugin_session = plugin.start_session(description, options, timestamp)?;
            let session_id = plugin_session.id();
            let flags = plugin_session.flags();

            profiler.current_session = Some(Session {
                plugin_session,
                plugin,
                flags,
                statements: HashMap::new(),
                requests: HashSet::new(),
            });

            Ok(session_id)
        })?;

        self.paused = false;

        if let Some(interval) = flush_interval {
            self.set_flush_interval(interval)?;
        }

        tracing::info!("profiler session {} started", session_id);
        Ok(session_id)
    }

    /// Drop the session after telling the plugin it was cancelled. No flush.
    pub fn cancel_session(&mut self) {
        if let Some(mut session) = self.current_session.take() {
            if let Err(error) = session.plugin_session.cancel() {
                tracing::error!("profiler cancel_session: {:#}", error);
            }
        }
    }

    pub fn finish_session(&mut self, flush_data: bool) {
        if let Some(mut session) = self.current_session.take() {
            if let Ok(attachment) = self.attachment() {
                let timestamp = attachment.current_timestamp();
                if let Err(error) = session.plugin_session.finish(timestamp) {
                    tracing::error!("profiler finish_session: {:#}", error);
                }
            }
        }

        if flush_data {
            self.flush(true);
        }
    }

    pub fn pause_session(&mut self, flush_data: bool) {
        if self.current_session.is_some() {
            self.paused = true;
        }

        if flush_data {
            self.flush(true);
        }
    }

    pub fn resume_session(&mut self) {
        if self.current_session.is_some() {
            self.paused = false;
            self.update_flush_timer(true);
        }
    }

    pub fn set_flush_interval(&mut self, interval: i32) -> Result<()> {
        Self::check_flush_interval(interval)?;
        self.current_flush_interval = interval as u32;
        self.update_flush_timer(true);
        Ok(())
    }

    /// Drop the session without notifying the plugin; clear the plugin map.
    pub fn discard(&mut self) {
        self.current_session = None;
        self.active_plugins.clear();
        self.update_flush_timer(true);
    }

    /// Flush every active plugin, then garbage-collect plugins no current
    /// session references.
    pub fn flush(&mut self, update_timer: bool) {
        self.with_paused(|profiler| {
            let mut stale = Vec::new();

            for (name, plugin) in &profiler.active_plugins {
                if let Err(error) = plugin.flush() {
                    tracing::error!("profiler flush ({}): {:#}", name, error);
                }

                let in_use = profiler
                    .current_session
                    .as_ref()
                    .map(|session| Arc::ptr_eq(&session.plugin, plugin))
                    .unwrap_or(false);

                if !in_use {
                    stale.push(name.clone());
                }
            }

            for name in stale {
                profiler.active_plugins.remove(&name);
            }
        });

        if update_timer {
            self.update_flush_timer(true);
        }
    }

    /// Arm the timer iff a session exists, is not paused and the interval is
    /// non-zero; otherwise stop it when allowed to.
    pub(crate) fn update_flush_timer(&mut self, can_stop: bool) {
        if self.current_session.is_some() && !self.paused && self.current_flush_interval > 0 {
            self.flush_timer
                .reset(Duration::from_secs(self.current_flush_interval as u64));
        } else if can_stop {
            self.flush_timer.stop();
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Observer hook entry points
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn wants_record_source_events(&self) -> bool {
        self.is_active()
            && self
                .current_session
                .as_ref()
                .map(|session| session.flags.contains(SessionFlags::RECORD_SOURCE_EVENTS))
                .unwrap_or(false)
    }

    /// Define-on-first-use work for a node about to open: its statement
    /// chain, its cursor, and the cursor's whole record-source subtree.
    pub(crate) fn prepare_record_source(&mut self, req: &Request, ids: AccessPathIds) {
        if !self.is_active() {
            return;
        }

        let Some(statement_id) = self.ensure_statement(req) else {
            return;
        };

        self.ensure_cursor_and_sources(req, statement_id, ids);
    }

    /// Walk the request's statement chain upward, defining every statement
    /// the session has not seen, ancestors before descendants.
    fn ensure_statement(&mut self, req: &Request) -> Option<StatementId> {
        let session = self.current_session.as_mut()?;
        let leaf = req.statement();

        if session.statements.contains_key(&leaf.id()) {
            return Some(leaf.id());
        }

        let mut chain = Vec::new();
        let mut current = Some(leaf.clone());
        while let Some(statement) = current {
            if session.statements.contains_key(&statement.id()) {
                break;
            }
            current = statement.parent().cloned();
            chain.push(statement);
        }

        for statement in chain.iter().rev() {
            let parent_id = statement.parent().map(|parent| parent.id()).unwrap_or(0);
            if let Err(error) = session.plugin_session.define_statement(
                statement.id() as i64,
                parent_id as i64,
                statement.kind().as_str(),
                statement.package_name(),
                statement.routine_name(),
                statement.sql_text().unwrap_or(""),
            ) {
                tracing::error!("profiler define_statement: {:#}", error);
            }
            session
                .statements
                .insert(statement.id(), StatementProfile::default());
        }

        Some(leaf.id())
    }

    fn ensure_cursor_and_sources(
        &mut self,
        req: &Request,
        statement_id: StatementId,
        ids: AccessPathIds,
    ) {
        let Some(cursor) = req.statement().cursor_by_id(ids.cursor_id) else {
            return;
        };
        let Some(session) = self.current_session.as_mut() else {
            return;
        };

        session.requests.insert(req.id());

        let Session {
            plugin_session,
            statements,
            ..
        } = session;
        let Some(profile) = statements.get_mut(&statement_id) else {
            return;
        };

        if !profile.defined_cursors.contains(&cursor.cursor_id()) {
            if let Err(error) = plugin_session.define_cursor(
                statement_id as i64,
                cursor.cursor_id(),
                cursor.name(),
                cursor.line(),
                cursor.column(),
            ) {
                tracing::error!("profiler define_cursor: {:#}", error);
            }
            profile.defined_cursors.insert(cursor.cursor_id());
        }

        if profile.rec_source_sequence.contains_key(&ids.rec_source_id) {
            return;
        }

        // Flatten the subtree rooted at the cursor and assign pre-order
        // sequences, each child's parent_sequence mirroring the tree
        // (0 at the cursor root).
        let plan = cursor.plan();
        let flat = plan.as_flat_list();
        let mut sequences: HashMap<RecSourceId, u32> = HashMap::new();

        for (entry, parent) in flat {
            if let Some(&existing) = profile.rec_source_sequence.get(&entry.ids.rec_source_id) {
                sequences.insert(entry.ids.rec_source_id, existing);
                continue;
            }

            let next = profile
                .cursor_next_sequence
                .entry(cursor.cursor_id())
                .or_insert(0);
            *next += 1;
            let sequence = *next;
            sequences.insert(entry.ids.rec_source_id, sequence);

            let parent_sequence = parent
                .and_then(|parent| sequences.get(&parent.ids.rec_source_id).copied())
                .unwrap_or(0);

            if let Err(error) = plugin_session.define_record_source(
                statement_id as i64,
                entry.ids.cursor_id,
                sequence,
                entry.level,
                &entry.description,
                parent_sequence,
            ) {
                tracing::error!("profiler define_record_source: {:#}", error);
            }
            profile
                .rec_source_sequence
                .insert(entry.ids.rec_source_id, sequence);
        }
    }

    /// Report one timed open/fetch to the plugin.
    pub(crate) fn on_record_source_event(
        &mut self,
        req: &Request,
        ids: AccessPathIds,
        event: RecordSourceEvent,
        elapsed_ticks: u64,
    ) {
        if !self.is_active() {
            return;
        }
        let Some(session) = self.current_session.as_mut() else {
            return;
        };
        if !session.flags.contains(SessionFlags::RECORD_SOURCE_EVENTS) {
            return;
        }

        session.requests.insert(req.id());

        if let Err(error) = session.plugin_session.on_record_source_event(
            req.statement().id() as i64,
            req.id() as i64,
            ids.cursor_id,
            ids.rec_source_id,
            event,
            elapsed_ticks,
        ) {
            tracing::error!("profiler record source event: {:#}", error);
        }
    }

    /// Executor callout when a request completes.
    pub(crate) fn on_request_finish(&mut self, req: &Request) {
        let Ok(attachment) = self.attachment() else {
            return;
        };
        let Some(session) = self.current_session.as_mut() else {
            return;
        };
        if !session.requests.remove(&req.id()) {
            return;
        }

        let timestamp = attachment.current_timestamp();
        if let Err(error) = session.plugin_session.on_request_finish(
            req.statement().id() as i64,
            req.id() as i64,
            timestamp,
            &req.stats,
        ) {
            tracing::error!("profiler on_request_finish: {:#}", error);
        }
    }
}

impl Drop for ProfilerManager {
    fn drop(&mut self) {
        self.flush_timer.stop();
    }
}
