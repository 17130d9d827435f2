use crate::component::{Component, TickMode};
use crate::utils::TaskGate;
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

/// A dispatched component tick, bound to one buffer.
pub(crate) struct Task {
    pub component: Arc<Component>,
    pub buffer: usize,
    pub gate: Arc<TaskGate>,
}

impl Task {
    pub(crate) fn run(self) {
        // Pool tasks only exist in Parallel mode; Series ticks run inline.
        self.component.do_tick(TickMode::Parallel, self.buffer);
        self.gate.finish();
    }
}

/// Shared worker pool for Parallel-mode ticking.
///
/// Workers are partitioned into one FIFO bucket per buffer, so tasks for a
/// given buffer are executed in dispatch order and never compete with other
/// buffers for a worker. A pool built with `threads_per_buffer == 0` spawns
/// no workers at all; components treat it as "no pool" and only adopt its
/// buffer count.
pub struct ThreadPool {
    buffer_count: usize,
    threads_per_buffer: usize,
    buckets: Vec<Sender<Task>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(buffer_count: usize, threads_per_buffer: usize) -> Arc<Self> {
        let buffer_count = buffer_count.max(1);

        let mut buckets = Vec::with_capacity(buffer_count);
        let mut workers = Vec::with_capacity(buffer_count * threads_per_buffer);

        for buffer in 0..buffer_count {
            let (tx, rx) = channel::unbounded::<Task>();
            for worker in 0..threads_per_buffer {
                let rx: Receiver<Task> = rx.clone();
                workers.push(
                    thread::Builder::new()
                        .name(format!("flowrt-pool-{buffer}-{worker}"))
                        .spawn(move || {
                            while let Ok(task) = rx.recv() {
                                task.run();
                            }
                        })
                        .expect("failed to spawn pool worker"),
                );
            }
            buckets.push(tx);
        }

        tracing::debug!(
            buffer_count,
            threads_per_buffer,
            "[ThreadPool] workers started"
        );

        Arc::new(Self {
            buffer_count,
            threads_per_buffer,
            buckets,
            workers,
        })
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    #[inline]
    pub fn threads_per_buffer(&self) -> usize {
        self.threads_per_buffer
    }

    /// Enqueue a task on its buffer's bucket. Falls back to running the
    /// task on the caller if the bucket is gone, so its gate always opens.
    pub(crate) fn execute(&self, buffer: usize, task: Task) {
        match self.buckets.get(buffer) {
            Some(tx) => {
                if let Err(rejected) = tx.send(task) {
                    rejected.into_inner().run();
                }
            }
            None => task.run(),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Closing the buckets lets every worker drain its queue and exit.
        self.buckets.clear();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        tracing::debug!("[ThreadPool] workers joined");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_is_reported() {
        let pool = ThreadPool::new(3, 2);
        assert_eq!(pool.buffer_count(), 3);
        assert_eq!(pool.threads_per_buffer(), 2);
    }

    #[test]
    fn zero_buffers_clamps_to_one() {
        let pool = ThreadPool::new(0, 1);
        assert_eq!(pool.buffer_count(), 1);
    }

    #[test]
    fn zero_threads_spawns_no_workers() {
        let pool = ThreadPool::new(2, 0);
        assert_eq!(pool.threads_per_buffer(), 0);
    }
}
