use crate::component::Component;
use crate::pool::{Task, ThreadPool};
use crate::utils::TaskGate;
use std::sync::Arc;

/// Trampoline that runs one component's tick for one buffer on the pool.
///
/// Without a pool, `tick_async` and `wait` are no-ops; the component runs
/// its tick synchronously on the caller instead.
pub(crate) struct ComponentThread {
    pool: Option<Arc<ThreadPool>>,
    buffer: usize,
    gate: Arc<TaskGate>,
}

impl ComponentThread {
    pub fn new(pool: Option<Arc<ThreadPool>>, buffer: usize) -> Self {
        Self {
            pool,
            buffer,
            gate: Arc::new(TaskGate::default()),
        }
    }

    /// Enqueue the component's tick on the pool bucket for this buffer.
    pub fn tick_async(&self, component: &Arc<Component>) {
        let Some(pool) = &self.pool else {
            return;
        };
        self.gate.begin();
        pool.execute(
            self.buffer,
            Task {
                component: component.clone(),
                buffer: self.buffer,
                gate: self.gate.clone(),
            },
        );
    }

    /// Block until the enqueued tick (if any) has completed.
    #[inline]
    pub fn wait(&self) {
        self.gate.wait();
    }
}
