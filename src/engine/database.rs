// Database object: the ownership root for everything process-wide
//
// The database owns the attachment table, the lock manager, the registry of
// named profiler channels (the in-process model of the named shared-memory
// regions) and the profiler plugin registry. Channel names embed the
// database's unique file id, a hash of its canonical path, so two databases
// never collide on a channel.

use super::{Attachment, AttachmentId, LockManager};
use crate::config::ProfilerConfig;
use crate::ipc::channel::ChannelRegistry;
use crate::profiler::jsonl::JsonlPlugin;
use crate::profiler::plugin::{PluginRegistry, ProfilerPlugin};
use crate::profiler::ProfilerManager;
use chrono::FixedOffset;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub struct Database {
    path: PathBuf,
    unique_id: String,
    config: ProfilerConfig,
    lock_manager: LockManager,
    channels: ChannelRegistry,
    plugins: PluginRegistry,
    attachments: Mutex<HashMap<AttachmentId, Arc<Attachment>>>,
    next_attachment_id: AtomicU64,
    self_weak: Weak<Database>,
}

impl Database {
    pub fn open(path: impl Into<PathBuf>) -> Arc<Self> {
        Self::open_with_config(path, ProfilerConfig::default())
    }

    pub fn open_with_config(path: impl Into<PathBuf>, config: ProfilerConfig) -> Arc<Self> {
        let path = path.into();
        let unique_id = unique_file_id(&path);

        let plugins = PluginRegistry::new();
        let data_dir = config.data_dir.clone();
        plugins.register("default", move || {
            Arc::new(JsonlPlugin::new(data_dir.clone())) as Arc<dyn ProfilerPlugin>
        });

        tracing::info!("database {} opened (unique id {})", path.display(), unique_id);

        Arc::new_cyclic(|self_weak| Self {
            path,
            unique_id,
            config,
            lock_manager: LockManager::new(),
            channels: ChannelRegistry::new(),
            plugins,
            attachments: Mutex::new(HashMap::new()),
            next_attachment_id: AtomicU64::new(1),
            self_weak: self_weak.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// The process-wide name of one attachment's profiler channel.
    pub fn channel_name(&self, attachment_id: AttachmentId) -> String {
        format!("profiler-{}-{}", self.unique_id, attachment_id)
    }

    /// Open a new attachment as `user_name`, in UTC.
    pub fn attach(&self, user_name: &str) -> Arc<Attachment> {
        self.attach_with_timezone(user_name, FixedOffset::east_opt(0).unwrap())
    }

    pub fn attach_with_timezone(&self, user_name: &str, timezone: FixedOffset) -> Arc<Attachment> {
        let id = self.next_attachment_id.fetch_add(1, Ordering::Relaxed);
        let attachment = Attachment::new(self.self_weak.clone(), id, user_name, timezone);

        // The attachment lock backs remote liveness probes; the listener
        // lock carries the blocking notification that lazily spawns the
        // profiler listener (delivered when a remote caller requests it
        // shared).
        self.lock_manager.lock_attachment(id);
        let weak = Arc::downgrade(&attachment);
        self.lock_manager
            .lock_listener_exclusive(id, Arc::new(move || ProfilerManager::blocking_ast(&weak)));

        self.attachments.lock().unwrap().insert(id, attachment.clone());
        tracing::info!("attachment {} opened by {}", id, user_name);
        attachment
    }

    pub fn attachment(&self, id: AttachmentId) -> Option<Arc<Attachment>> {
        self.attachments.lock().unwrap().get(&id).cloned()
    }

    pub(crate) fn remove_attachment(&self, id: AttachmentId) {
        self.attachments.lock().unwrap().remove(&id);
    }
}

/// Identity hash of the database file: first 16 hex chars of the SHA-256 of
/// the path.
fn unique_file_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}
