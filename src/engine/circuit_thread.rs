use crate::component::{Component, TickMode};
use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread;

struct BarrierFlags {
    got_sync: bool,
    got_resume: bool,
}

struct WorkerShared {
    stop: CachePadded<AtomicBool>,
    stopped: CachePadded<AtomicBool>,
    gate: Mutex<BarrierFlags>,
    sync_condvar: Condvar,
    resume_condvar: Condvar,
}

struct Worker {
    shared: Arc<WorkerShared>,
    join: Option<thread::JoinHandle<()>>,
}

/// Worker group driving the shared component list for one buffer.
///
/// Each resume triggers one tick pass; the following resume triggers the
/// matching reset pass and the next tick pass, so `B` groups driven
/// round-robin pipeline `B` ticks at once. Every worker in a group uses the
/// same buffer index: if two workers of one group processed different
/// buffers, an in-order component could observe buffer sequences like
/// `1,2,3` from one group and `2,3,1,2,3` from another and stall its token
/// ring. Extra workers instead stride the same list for the same buffer,
/// which pays off because distinct components have independent state.
pub(crate) struct CircuitThread {
    workers: Vec<Worker>,
    mode: Arc<CachePadded<AtomicU8>>,
}

impl CircuitThread {
    pub fn start(
        components: Arc<RwLock<Vec<Arc<Component>>>>,
        buffer: usize,
        threads_per_buffer: usize,
    ) -> Self {
        let mode = Arc::new(CachePadded::new(AtomicU8::new(TickMode::Series.as_u8())));

        let workers = (0..threads_per_buffer.max(1))
            .map(|worker| {
                let shared = Arc::new(WorkerShared {
                    stop: CachePadded::new(AtomicBool::new(false)),
                    stopped: CachePadded::new(AtomicBool::new(false)),
                    gate: Mutex::new(BarrierFlags {
                        got_sync: false,
                        got_resume: false,
                    }),
                    sync_condvar: Condvar::new(),
                    resume_condvar: Condvar::new(),
                });

                let thread_shared = shared.clone();
                let thread_components = components.clone();
                let thread_mode = mode.clone();
                let join = thread::Builder::new()
                    .name(format!("flowrt-circuit-{buffer}-{worker}"))
                    .spawn(move || {
                        Self::run(&thread_shared, &thread_components, buffer, &thread_mode);
                    })
                    .expect("failed to spawn circuit worker");

                Worker {
                    shared,
                    join: Some(join),
                }
            })
            .collect();

        Self { workers, mode }
    }

    fn run(
        shared: &WorkerShared,
        components: &RwLock<Vec<Arc<Component>>>,
        buffer: usize,
        mode: &AtomicU8,
    ) {
        Self::barrier(shared);

        while !shared.stop.load(Ordering::Acquire) {
            let mode = TickMode::from_u8(mode.load(Ordering::Acquire));

            for component in components.read().iter() {
                component.tick(mode, buffer);
            }

            Self::barrier(shared);

            for component in components.read().iter() {
                component.reset(buffer);
            }
        }

        shared.stopped.store(true, Ordering::Release);
    }

    /// Announce the sync point and park until resumed.
    fn barrier(shared: &WorkerShared) {
        let mut gate = shared.gate.lock();
        gate.got_sync = true;
        shared.sync_condvar.notify_all();
        while !gate.got_resume {
            shared.resume_condvar.wait(&mut gate);
        }
        gate.got_resume = false;
    }

    /// Block until every worker has reached its sync point.
    pub fn sync(&self) {
        for worker in &self.workers {
            if worker.shared.stopped.load(Ordering::Acquire) {
                return;
            }
            let mut gate = worker.shared.gate.lock();
            while !gate.got_sync {
                worker.shared.sync_condvar.wait(&mut gate);
            }
        }
    }

    /// Gather every worker's sync, switch mode, then release them all.
    pub fn sync_and_resume(&self, mode: TickMode) {
        for worker in &self.workers {
            if worker.shared.stopped.load(Ordering::Acquire) {
                return;
            }
            let mut gate = worker.shared.gate.lock();
            while !gate.got_sync {
                worker.shared.sync_condvar.wait(&mut gate);
            }
            gate.got_sync = false;
        }

        self.mode.store(mode.as_u8(), Ordering::Release);

        for worker in &self.workers {
            let mut gate = worker.shared.gate.lock();
            gate.got_resume = true;
            worker.shared.resume_condvar.notify_all();
        }
    }

    /// Sync, raise stop, release once more so workers observe it, join.
    pub fn stop(&mut self) {
        if self.workers.iter().all(|w| w.join.is_none()) {
            return;
        }

        self.sync();

        for worker in &self.workers {
            worker.shared.stop.store(true, Ordering::Release);
        }

        let mode = TickMode::from_u8(self.mode.load(Ordering::Acquire));
        self.sync_and_resume(mode);

        for worker in &mut self.workers {
            if let Some(join) = worker.join.take() {
                let _ = join.join();
            }
        }
    }
}

impl Drop for CircuitThread {
    fn drop(&mut self) {
        self.stop();
    }
}
