// Blocking wakeup primitives for the profiler channel
//
// IpcEvent models a counting inter-process event: `clear` snapshots the
// counter, `post` increments it, and `wait(value)` blocks until the counter
// has moved past the snapshot. A post landing between clear and wait is
// therefore never missed - wait sees the counter already differs and returns
// immediately. This clear -> post -> wait ordering is what makes the
// client/listener ping-pong safe without holding any lock around the events.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct EventState {
    count: u64,
    finalized: bool,
}

/// Counting event with `clear -> post -> wait(value)` semantics.
#[derive(Debug)]
pub struct IpcEvent {
    state: Mutex<EventState>,
    wakeup: Condvar,
}

impl IpcEvent {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EventState {
                count: 0,
                finalized: false,
            }),
            wakeup: Condvar::new(),
        }
    }

    /// Snapshot the current counter. Pass the value to a later `wait`.
    pub fn clear(&self) -> u64 {
        self.state.lock().unwrap().count
    }

    /// Increment the counter and wake all waiters.
    pub fn post(&self) {
        let mut state = self.state.lock().unwrap();
        state.count = state.count.wrapping_add(1);
        self.wakeup.notify_all();
    }

    /// Block until the counter differs from `value`.
    ///
    /// Returns `false` when the event was finalized instead of posted, which
    /// only happens while the owning listener tears down.
    pub fn wait(&self, value: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        while state.count == value && !state.finalized {
            state = self.wakeup.wait(state).unwrap();
        }
        !state.finalized
    }

    /// Permanently wake every current and future waiter.
    pub fn finalize(&self) {
        let mut state = self.state.lock().unwrap();
        state.finalized = true;
        self.wakeup.notify_all();
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().unwrap().finalized
    }
}

impl Default for IpcEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// Counting semaphore used for the listener startup handshake.
#[derive(Debug)]
pub struct Semaphore {
    count: Mutex<usize>,
    wakeup: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            wakeup: Condvar::new(),
        }
    }

    pub fn release(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.wakeup.notify_one();
    }

    /// Try to take one permit, waiting up to `timeout`. Returns whether a
    /// permit was taken.
    pub fn try_enter(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().unwrap();
        loop {
            if *count > 0 {
                *count -= 1;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.wakeup.wait_timeout(count, deadline - now).unwrap();
            count = guard;
        }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_sees_post_between_clear_and_wait() {
        let event = IpcEvent::new();
        let value = event.clear();
        event.post();
        // The post already moved the counter, so the wait must not block.
        assert!(event.wait(value));
    }

    #[test]
    fn test_wait_blocks_until_posted() {
        let event = Arc::new(IpcEvent::new());
        let value = event.clear();

        let poster = {
            let event = event.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                event.post();
            })
        };

        assert!(event.wait(value));
        poster.join().unwrap();
    }

    #[test]
    fn test_finalize_unblocks_waiters() {
        let event = Arc::new(IpcEvent::new());
        let value = event.clear();

        let finalizer = {
            let event = event.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                event.finalize();
            })
        };

        assert!(!event.wait(value));
        assert!(event.is_finalized());
        finalizer.join().unwrap();
    }

    #[test]
    fn test_ping_pong() {
        let ping = Arc::new(IpcEvent::new());
        let pong = Arc::new(IpcEvent::new());

        // Snapshot before the first post can land, so the responder never
        // misses it.
        let initial = ping.clear();

        let responder = {
            let ping = ping.clone();
            let pong = pong.clone();
            thread::spawn(move || {
                let mut value = initial;
                for _ in 0..100 {
                    ping.wait(value);
                    value = ping.clear();
                    pong.post();
                }
            })
        };

        for _ in 0..100 {
            let value = pong.clear();
            ping.post();
            assert!(pong.wait(value));
        }
        responder.join().unwrap();
    }

    #[test]
    fn test_semaphore_timeout() {
        let semaphore = Semaphore::new();
        assert!(!semaphore.try_enter(Duration::from_millis(20)));
        semaphore.release();
        assert!(semaphore.try_enter(Duration::from_millis(20)));
    }
}
