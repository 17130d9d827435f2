use crate::circuit::CircuitCore;
use crate::component::TickMode;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;

struct AutoState {
    paused: bool,
    parked: bool,
    stop: bool,
}

struct AutoShared {
    state: Mutex<AutoState>,
    resume_condvar: Condvar,
    parked_condvar: Condvar,
}

/// Daemon thread repeatedly driving `Circuit::tick` until stopped.
///
/// `pause` returns only once the loop is parked between ticks, so callers
/// may mutate wiring immediately afterwards.
pub(crate) struct AutoTickThread {
    shared: Arc<AutoShared>,
    mode: TickMode,
    join: Option<thread::JoinHandle<()>>,
}

impl AutoTickThread {
    pub fn start(core: Arc<CircuitCore>, mode: TickMode) -> Self {
        let shared = Arc::new(AutoShared {
            state: Mutex::new(AutoState {
                paused: false,
                parked: false,
                stop: false,
            }),
            resume_condvar: Condvar::new(),
            parked_condvar: Condvar::new(),
        });

        let thread_shared = shared.clone();
        let join = thread::Builder::new()
            .name("flowrt-auto-tick".to_string())
            .spawn(move || {
                tracing::debug!(?mode, "[Circuit] auto-tick loop started");
                loop {
                    {
                        let mut state = thread_shared.state.lock();
                        while state.paused && !state.stop {
                            state.parked = true;
                            thread_shared.parked_condvar.notify_all();
                            thread_shared.resume_condvar.wait(&mut state);
                        }
                        if state.stop {
                            break;
                        }
                        state.parked = false;
                    }
                    core.tick(mode);
                }
                tracing::debug!("[Circuit] auto-tick loop stopped");
            })
            .expect("failed to spawn auto-tick thread");

        Self {
            shared,
            mode,
            join: Some(join),
        }
    }

    #[inline]
    pub fn mode(&self) -> TickMode {
        self.mode
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// Park the loop between ticks. Returns once it is parked.
    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        if state.stop {
            return;
        }
        state.paused = true;
        while !state.parked && !state.stop {
            self.shared.parked_condvar.wait(&mut state);
        }
    }

    pub fn resume(&self) {
        let mut state = self.shared.state.lock();
        state.paused = false;
        self.shared.resume_condvar.notify_all();
    }

    /// Raise stop, unblock the loop and join it.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stop = true;
            state.paused = false;
            self.shared.resume_condvar.notify_all();
            self.shared.parked_condvar.notify_all();
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for AutoTickThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
