// Lock manager: attachment liveness and listener wakeup
//
// Two resources per attachment. The attachment lock is held for the
// attachment's whole life; a probe that manages to take it exclusively has
// proven the attachment dead. The profiler-listener lock is held
// exclusively by the attachment with a blocking notification callback
// attached: a shared request from another attachment delivers the
// notification (which lazily spawns the listener and releases the lock) and
// then waits for the release.
//
// Notifications are delivered synchronously on the requesting thread; the
// handler must swallow its own errors, because there is nobody to raise
// them to.

use super::AttachmentId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex};

pub type BlockingAst = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct LockState {
    attachments: HashSet<AttachmentId>,
    listeners: HashMap<AttachmentId, BlockingAst>,
}

pub struct LockManager {
    state: Mutex<LockState>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            released: Condvar::new(),
        }
    }

    /// Take the attachment lock. Held from attach to detach.
    pub fn lock_attachment(&self, id: AttachmentId) {
        self.state.lock().unwrap().attachments.insert(id);
    }

    pub fn release_attachment(&self, id: AttachmentId) {
        self.state.lock().unwrap().attachments.remove(&id);
    }

    /// Exclusive no-wait probe on the attachment lock. Returns whether the
    /// lock was granted - i.e. whether the attachment is NOT alive. The
    /// probe lock is released before returning either way.
    pub fn try_lock_attachment_exclusive(&self, id: AttachmentId) -> bool {
        !self.state.lock().unwrap().attachments.contains(&id)
    }

    /// Take the profiler-listener lock exclusively, registering the blocking
    /// notification delivered when somebody requests it shared.
    pub fn lock_listener_exclusive(&self, id: AttachmentId, ast: BlockingAst) {
        self.state.lock().unwrap().listeners.insert(id, ast);
    }

    /// Release the listener lock and wake shared waiters. A release of a
    /// lock that is not held is a no-op, which keeps the notification
    /// handler idempotent.
    pub fn release_listener_exclusive(&self, id: AttachmentId) {
        let mut state = self.state.lock().unwrap();
        if state.listeners.remove(&id).is_some() {
            self.released.notify_all();
        }
    }

    /// Shared, waiting request on the listener lock. Delivers the holder's
    /// blocking notification and blocks until the holder releases; grants
    /// immediately when nobody holds the lock exclusively. The shared lock
    /// itself conflicts with nothing, so it is released on return.
    pub fn lock_listener_shared(&self, id: AttachmentId) {
        let ast = self.state.lock().unwrap().listeners.get(&id).cloned();

        let Some(ast) = ast else {
            return;
        };

        ast();

        let mut state = self.state.lock().unwrap();
        while state.listeners.contains_key(&id) {
            state = self.released.wait(state).unwrap();
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_liveness_probe() {
        let locks = LockManager::new();
        // Nobody holds attachment 7: the exclusive probe is granted.
        assert!(locks.try_lock_attachment_exclusive(7));

        locks.lock_attachment(7);
        assert!(!locks.try_lock_attachment_exclusive(7));

        locks.release_attachment(7);
        assert!(locks.try_lock_attachment_exclusive(7));
    }

    #[test]
    fn test_shared_request_delivers_notification() {
        let locks = Arc::new(LockManager::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let inner = locks.clone();
        locks.lock_listener_exclusive(
            3,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                inner.release_listener_exclusive(3);
            }),
        );

        locks.lock_listener_shared(3);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Lock released by the handler: later requests are granted without
        // another notification.
        locks.lock_listener_shared(3);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
