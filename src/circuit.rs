use crate::component::{Component, TickMode};
use crate::config::CircuitConfig;
use crate::engine::auto_tick::AutoTickThread;
use crate::engine::circuit_thread::CircuitThread;
use crate::pool::ThreadPool;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Stable handle for a component registered with a circuit.
pub type ComponentId = usize;

struct Sched {
    threads: Vec<CircuitThread>,
    pool: Option<Arc<ThreadPool>>,
    buffer_count: usize,
    threads_per_buffer: usize,
    current: usize,
}

/// Shared circuit state, also owned by the auto-tick daemon.
pub(crate) struct CircuitCore {
    components: Arc<RwLock<Vec<Arc<Component>>>>,
    registry: Mutex<Vec<(ComponentId, Arc<Component>)>>,
    next_id: AtomicUsize,
    sched: Mutex<Sched>,
}

impl CircuitCore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            components: Arc::new(RwLock::new(Vec::new())),
            registry: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            sched: Mutex::new(Sched {
                threads: Vec::new(),
                pool: None,
                buffer_count: 0,
                threads_per_buffer: 1,
                current: 0,
            }),
        })
    }

    /// Advance the circuit by one logical tick.
    ///
    /// Single-buffer mode walks the list inline: tick pass, then reset
    /// pass. Buffered mode issues a sync-and-resume to the next worker
    /// group round-robin; a new tick therefore begins before earlier ones
    /// finish, pipelining `buffer_count` ticks through the graph.
    pub(crate) fn tick(&self, mode: TickMode) {
        let mut sched = self.sched.lock();

        if sched.threads.is_empty() {
            let components = self.components.read();
            for component in components.iter() {
                component.tick(mode, 0);
            }
            for component in components.iter() {
                component.reset(0);
            }
        } else {
            let current = sched.current;
            sched.threads[current].sync_and_resume(mode);
            sched.current = (current + 1) % sched.threads.len();
        }
    }

    /// Wait for every issued pass to reach its sync point.
    pub(crate) fn sync_all(&self) {
        let sched = self.sched.lock();
        for thread in &sched.threads {
            thread.sync();
        }
    }

    /// Wait out pool tasks still in flight after a sync. A synced pass has
    /// finished dispatching, but in Parallel mode its tasks may still be
    /// running; wiring must not change under them.
    fn drain_tasks(&self) {
        for component in self.components.read().iter() {
            component.wait_all();
        }
    }

    fn set_buffer_count(&self, buffer_count: usize, threads_per_buffer: usize) {
        let mut sched = self.sched.lock();

        for thread in sched.threads.iter_mut() {
            thread.stop();
        }
        sched.threads.clear();

        sched.buffer_count = buffer_count;
        sched.threads_per_buffer = threads_per_buffer;
        sched.current = 0;

        let components = self.components.read();
        if buffer_count == 0 {
            sched.pool = None;
            for component in components.iter() {
                component.set_thread_pool(None);
            }
        } else {
            let pool = ThreadPool::new(buffer_count, threads_per_buffer);
            for component in components.iter() {
                component.set_thread_pool(Some(pool.clone()));
            }
            sched.pool = Some(pool);
            sched.threads = (0..buffer_count)
                .map(|buffer| {
                    CircuitThread::start(
                        self.components.clone(),
                        buffer,
                        threads_per_buffer.max(1),
                    )
                })
                .collect();
        }

        tracing::debug!(
            buffer_count,
            threads_per_buffer,
            "[Circuit] buffer geometry rebuilt"
        );
    }

    fn sort_components(&self) {
        let mut components = self.components.write();
        let mut keyed: Vec<(usize, Arc<Component>)> = components
            .iter()
            .map(|component| (component.circuit_position(0), component.clone()))
            .collect();
        // stable sort keeps registration order among equal positions
        keyed.sort_by_key(|(position, _)| *position);
        *components = keyed.into_iter().map(|(_, component)| component).collect();
    }

    fn shutdown(&self) {
        let mut sched = self.sched.lock();
        for thread in sched.threads.iter_mut() {
            thread.stop();
        }
        sched.threads.clear();
        sched.pool = None;
    }
}

/// A dataflow graph and its scheduler.
///
/// Owns the component list, the buffer geometry and the optional auto-tick
/// daemon. Every wiring operation pauses auto-tick, waits for in-flight
/// passes to sync, applies the change and resumes; callers never need to
/// sequence that themselves.
pub struct Circuit {
    core: Arc<CircuitCore>,
    auto: Mutex<Option<AutoTickThread>>,
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new()
    }
}

impl Circuit {
    pub fn new() -> Self {
        Self {
            core: CircuitCore::new(),
            auto: Mutex::new(None),
        }
    }

    /// Register a component; it adopts the circuit's buffer geometry.
    /// Re-adding a component returns its existing id.
    pub fn add_component(&self, component: &Arc<Component>) -> ComponentId {
        self.with_paused(|| {
            {
                let registry = self.core.registry.lock();
                if let Some((id, _)) = registry
                    .iter()
                    .find(|(_, existing)| Arc::ptr_eq(existing, component))
                {
                    return *id;
                }
            }

            let id = self.core.next_id.fetch_add(1, Ordering::Relaxed);
            component.set_thread_pool(self.core.sched.lock().pool.clone());
            self.core.registry.lock().push((id, component.clone()));
            self.core.components.write().push(component.clone());

            tracing::debug!(id, "[Circuit] component added");
            id
        })
    }

    pub fn component(&self, id: ComponentId) -> Option<Arc<Component>> {
        self.core
            .registry
            .lock()
            .iter()
            .find(|(existing, _)| *existing == id)
            .map(|(_, component)| component.clone())
    }

    pub fn component_count(&self) -> usize {
        self.core.registry.lock().len()
    }

    /// Detach a component's wires in both directions and drop the
    /// circuit's reference to it.
    pub fn remove_component(&self, id: ComponentId) -> bool {
        let Some(component) = self.component(id) else {
            return false;
        };
        self.remove_component_ref(&component)
    }

    pub fn remove_component_ref(&self, component: &Arc<Component>) -> bool {
        self.with_paused(|| {
            let found = {
                let mut registry = self.core.registry.lock();
                let before = registry.len();
                registry.retain(|(_, existing)| !Arc::ptr_eq(existing, component));
                registry.len() != before
            };
            if !found {
                return false;
            }

            self.detach(component);
            self.core
                .components
                .write()
                .retain(|existing| !Arc::ptr_eq(existing, component));

            tracing::debug!("[Circuit] component removed");
            true
        })
    }

    /// Detach a component's wires in both directions, keeping it registered.
    pub fn disconnect_component(&self, component: &Arc<Component>) {
        self.with_paused(|| self.detach(component));
    }

    fn detach(&self, component: &Arc<Component>) {
        component.disconnect_all_inputs();
        for other in self.core.components.read().iter() {
            if !Arc::ptr_eq(other, component) {
                other.disconnect_input_of(component);
            }
        }
    }

    /// Wire `source`'s output into `dest`'s input while quiescent.
    /// Keeps the component list ordered sources-first.
    pub fn connect_out_to_in(
        &self,
        source: &Arc<Component>,
        source_output: usize,
        dest: &Arc<Component>,
        dest_input: usize,
    ) -> bool {
        self.with_paused(|| {
            let connected = dest.connect_input(source, source_output, dest_input);
            if connected {
                self.core.sort_components();
            } else {
                tracing::debug!(
                    source_output,
                    dest_input,
                    "[Circuit] connect refused: arity mismatch"
                );
            }
            connected
        })
    }

    /// Rebuild the buffer geometry: `buffer_count == 0` selects synchronous
    /// single-buffer mode with no pool and no worker groups.
    pub fn set_buffer_count(&self, buffer_count: usize, threads_per_buffer: usize) {
        self.with_paused(|| {
            self.core.set_buffer_count(buffer_count, threads_per_buffer);
        });
    }

    pub fn buffer_count(&self) -> usize {
        self.core.sched.lock().buffer_count
    }

    pub fn threads_per_buffer(&self) -> usize {
        self.core.sched.lock().threads_per_buffer
    }

    pub fn configure(&self, config: &CircuitConfig) {
        self.set_buffer_count(config.buffer_count, config.threads_per_buffer);
    }

    /// Advance one logical tick in the given mode.
    pub fn tick(&self, mode: TickMode) {
        self.core.tick(mode);
    }

    /// Start the auto-tick daemon, or resume it when paused. Starting with
    /// a different mode restarts the daemon in that mode.
    pub fn start_auto_tick(&self, mode: TickMode) {
        let mut auto = self.auto.lock();

        if let Some(existing) = auto.as_ref()
            && existing.mode() == mode
        {
            existing.resume();
            return;
        }

        if let Some(mut existing) = auto.take() {
            existing.shutdown();
        }
        tracing::info!(?mode, "[Circuit] auto-tick started");
        *auto = Some(AutoTickThread::start(self.core.clone(), mode));
    }

    /// Pause auto-tick and wait for all issued passes and their dispatched
    /// tasks to finish.
    pub fn pause_auto_tick(&self) {
        if let Some(auto) = self.auto.lock().as_ref() {
            auto.pause();
        }
        self.core.sync_all();
        self.core.drain_tasks();
    }

    pub fn resume_auto_tick(&self) {
        if let Some(auto) = self.auto.lock().as_ref() {
            auto.resume();
        }
    }

    /// Stop and join the auto-tick daemon, then settle outstanding work.
    pub fn stop_auto_tick(&self) {
        if let Some(mut auto) = self.auto.lock().take() {
            auto.shutdown();
            tracing::info!("[Circuit] auto-tick stopped");
        }
        self.core.sync_all();
        self.core.drain_tasks();
    }

    /// Run `f` with auto-tick parked and all worker groups synced; restore
    /// the previous auto-tick state afterwards.
    fn with_paused<R>(&self, f: impl FnOnce() -> R) -> R {
        let auto = self.auto.lock();
        let resume_after = match auto.as_ref() {
            Some(existing) if !existing.is_paused() => {
                existing.pause();
                true
            }
            _ => false,
        };
        self.core.sync_all();
        self.core.drain_tasks();

        let result = f();

        if resume_after
            && let Some(existing) = auto.as_ref()
        {
            existing.resume();
        }
        result
    }
}

impl Drop for Circuit {
    fn drop(&mut self) {
        if let Some(mut auto) = self.auto.get_mut().take() {
            auto.shutdown();
        }
        self.core.shutdown();
    }
}
