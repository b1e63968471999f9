// Attachments and the engine context guard
//
// An attachment is an authenticated session within a database. All mutable
// attachment state - today that is the lazily created profiler manager -
// sits behind one mutex; `enter()` acquires it and hands back an
// `EngineContext`, the token every executor, listener and timer code path
// passes around while it works on the attachment.

use super::{AttachmentId, Database};
use crate::error::{Error, Result};
use crate::exec::{Request, Statement};
use crate::profiler::ProfilerManager;
use chrono::{DateTime, FixedOffset, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// System privileges an attachment can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Privilege {
    /// Allows profiling any attachment of the database, not just the
    /// caller's own.
    ProfileAnyAttachment,
}

pub(crate) struct AttachmentState {
    pub(crate) profiler: Option<ProfilerManager>,
}

pub struct Attachment {
    id: AttachmentId,
    user_name: String,
    timezone: FixedOffset,
    privileges: Mutex<HashSet<Privilege>>,
    database: Weak<Database>,
    self_weak: Weak<Attachment>,
    next_request_id: AtomicU64,
    state: Mutex<AttachmentState>,
}

impl Attachment {
    pub(crate) fn new(
        database: Weak<Database>,
        id: AttachmentId,
        user_name: &str,
        timezone: FixedOffset,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            id,
            user_name: user_name.to_string(),
            timezone,
            privileges: Mutex::new(HashSet::new()),
            database,
            self_weak: self_weak.clone(),
            next_request_id: AtomicU64::new(1),
            state: Mutex::new(AttachmentState { profiler: None }),
        })
    }

    pub fn id(&self) -> AttachmentId {
        self.id
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn timezone(&self) -> FixedOffset {
        self.timezone
    }

    pub fn database(&self) -> Result<Arc<Database>> {
        self.database.upgrade().ok_or(Error::AttachmentShutdown)
    }

    pub fn grant(&self, privilege: Privilege) {
        self.privileges.lock().unwrap().insert(privilege);
    }

    pub fn has_privilege(&self, privilege: Privilege) -> bool {
        self.privileges.lock().unwrap().contains(&privilege)
    }

    /// Wall-clock timestamp in the attachment's timezone.
    pub fn current_timestamp(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.timezone)
    }

    /// Instantiate a statement for execution.
    pub fn start_request(&self, statement: &Arc<Statement>) -> Request {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        Request::new(id, statement.clone())
    }

    /// Acquire the engine context for this attachment.
    pub fn enter(&self) -> EngineContext<'_> {
        EngineContext {
            attachment: self.self_weak.clone(),
            state: self.state.lock().unwrap(),
        }
    }

    /// Tear the attachment down: stop the profiler (flush timer, listener,
    /// shared channel) and release the attachment's locks.
    ///
    /// The profiler manager is taken out under the engine lock but dropped
    /// outside it - its worker threads take the same lock to finish their
    /// last callbacks.
    pub fn detach(&self) {
        let profiler = {
            let mut state = self.state.lock().unwrap();
            state.profiler.take()
        };
        drop(profiler);

        if let Some(database) = self.database.upgrade() {
            database.lock_manager().release_listener_exclusive(self.id);
            database.lock_manager().release_attachment(self.id);
            database.remove_attachment(self.id);
        }

        tracing::debug!("attachment {} detached", self.id);
    }
}

/// The engine context: exclusive access to one attachment's engine state.
pub struct EngineContext<'a> {
    attachment: Weak<Attachment>,
    state: MutexGuard<'a, AttachmentState>,
}

impl<'a> EngineContext<'a> {
    pub fn attachment(&self) -> Result<Arc<Attachment>> {
        self.attachment.upgrade().ok_or(Error::AttachmentShutdown)
    }

    /// The attachment's profiler manager, created on first use.
    pub fn profiler(&mut self) -> Result<&mut ProfilerManager> {
        if self.state.profiler.is_none() {
            let attachment = self.attachment()?;
            self.state.profiler = Some(ProfilerManager::new(&attachment)?);
        }
        Ok(self.state.profiler.as_mut().unwrap())
    }

    /// The profiler manager, if one has been created.
    pub(crate) fn profiler_opt(&mut self) -> Option<&mut ProfilerManager> {
        self.state.profiler.as_mut()
    }

    /// Executor callout on request completion.
    pub fn finish_request(&mut self, req: &Request) {
        if let Some(profiler) = self.profiler_opt() {
            profiler.on_request_finish(req);
        }
    }
}
