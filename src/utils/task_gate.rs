use crossbeam::utils::{Backoff, CachePadded};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

/// One-shot completion gate for a dispatched tick task.
///
/// The gate starts out completed, so waiting on a component that was never
/// dispatched returns immediately. `begin` arms it before enqueueing work;
/// `finish` releases every waiter. Waiters spin briefly before parking,
/// since in a well-balanced circuit the upstream task is usually a few
/// hundred nanoseconds from done.
pub struct TaskGate {
    done: CachePadded<AtomicBool>,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl Default for TaskGate {
    fn default() -> Self {
        Self {
            done: CachePadded::new(AtomicBool::new(true)),
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }
}

impl TaskGate {
    /// Arm the gate: a task is about to be enqueued.
    #[inline]
    pub fn begin(&self) {
        self.done.store(false, Ordering::Release);
    }

    /// Mark the task complete and wake all waiters.
    pub fn finish(&self) {
        let guard = self.lock.lock();
        self.done.store(true, Ordering::Release);
        drop(guard);
        self.condvar.notify_all();
    }

    /// Block until the armed task completes. No-op when nothing is pending.
    pub fn wait(&self) {
        let backoff = Backoff::new();
        while !backoff.is_completed() {
            if self.done.load(Ordering::Acquire) {
                return;
            }
            backoff.snooze();
        }

        let mut guard = self.lock.lock();
        while !self.done.load(Ordering::Acquire) {
            self.condvar.wait(&mut guard);
        }
    }
}
