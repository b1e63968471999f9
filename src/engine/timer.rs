// Re-arming one-shot timer on a dedicated thread
//
// The profiler's flush timer. `reset` arms (or re-arms) a single deadline;
// the callback runs on the timer thread when it expires and may itself call
// `reset` to arm the next shot. `stop` disarms without stopping the thread.
// The thread only exits on drop, which must never happen while the caller
// holds a lock the callback might be waiting on.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct TimerState {
    deadline: Option<Instant>,
    shutdown: bool,
}

#[derive(Debug)]
struct TimerShared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

pub struct FlushTimer {
    shared: Arc<TimerShared>,
    handle: Option<JoinHandle<()>>,
}

impl FlushTimer {
    /// Spawn the timer thread. The callback runs on it, unarmed until the
    /// first `reset`.
    pub fn spawn(
        name: impl Into<String>,
        callback: impl Fn() + Send + 'static,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                deadline: None,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        });

        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || Self::timer_thread(worker, callback))?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    fn timer_thread(shared: Arc<TimerShared>, callback: impl Fn()) {
        let mut state = shared.state.lock().unwrap();
        loop {
            if state.shutdown {
                break;
            }

            match state.deadline {
                None => {
                    state = shared.wakeup.wait(state).unwrap();
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.deadline = None;
                        // Run the callback unlocked so it can re-arm us.
                        drop(state);
                        callback();
                        state = shared.state.lock().unwrap();
                    } else {
                        let (guard, _) = shared
                            .wakeup
                            .wait_timeout(state, deadline - now)
                            .unwrap();
                        state = guard;
                    }
                }
            }
        }
    }

    /// Arm (or re-arm) the one-shot deadline.
    pub fn reset(&self, interval: Duration) {
        let mut state = self.shared.state.lock().unwrap();
        state.deadline = Some(Instant::now() + interval);
        self.shared.wakeup.notify_all();
    }

    /// Disarm without stopping the thread.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.deadline = None;
        self.shared.wakeup.notify_all();
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            self.shared.wakeup.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("flush timer thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for FlushTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushTimer").finish_non_exhaustive()
    }
}
