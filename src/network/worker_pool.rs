//! Fixed worker pool dengan bounded FIFO queue
//!
//! - Queue dijaga mutex, kedalaman di-signal lewat counting semaphore
//! - Submit tidak pernah block: queue penuh = task dikembalikan ke caller
//! - Shutdown: tutup queue, drain sisa task, bangunkan dan join semua thread

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::core::Semaphore;
use crate::error::{ServerError, ServerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    QueueFull,
    Closed,
}

/// Task yang ditolak, dikembalikan utuh ke caller
pub struct Rejected<T> {
    pub task: T,
    pub reason: RejectReason,
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    depth: Semaphore,
    closed: AtomicBool,
    capacity: usize,
}

pub struct WorkerPool<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    threads: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `workers` threads running `handler` over a queue of at most
    /// `capacity` pending tasks.
    pub fn new<F>(workers: usize, capacity: usize, handler: F) -> ServerResult<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        if workers == 0 || capacity == 0 {
            return Err(ServerError::Construction(format!(
                "worker pool needs threads and capacity, got {workers} threads / {capacity} slots"
            )));
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            depth: Semaphore::new(0),
            closed: AtomicBool::new(false),
            capacity,
        });
        let handler = Arc::new(handler);

        let mut pool = Self {
            shared,
            threads: Vec::with_capacity(workers),
        };
        for id in 0..workers {
            let shared = Arc::clone(&pool.shared);
            let handler = Arc::clone(&handler);
            let spawned = thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || run_worker(id, &shared, &*handler));
            match spawned {
                Ok(handle) => pool.threads.push(handle),
                Err(e) => {
                    // joins whatever already started
                    pool.shutdown();
                    return Err(ServerError::Construction(format!(
                        "failed to spawn worker {id}: {e}"
                    )));
                }
            }
        }

        tracing::info!(workers, capacity, "worker pool started");
        Ok(pool)
    }

    /// Enqueue tanpa block. Queue penuh atau sudah ditutup -> `Rejected`.
    pub fn submit(&self, task: T) -> Result<(), Rejected<T>> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Rejected {
                task,
                reason: RejectReason::Closed,
            });
        }
        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.shared.capacity {
                return Err(Rejected {
                    task,
                    reason: RejectReason::QueueFull,
                });
            }
            queue.push_back(task);
        }
        self.shared.depth.post();
        Ok(())
    }

    /// Pending (not yet picked up) tasks
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn workers(&self) -> usize {
        self.threads.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stop accepting tasks, let workers drain the queue, join them.
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.shared.closed.store(true, Ordering::Release);
        // one wake-up per worker on top of the queued tasks' permits
        for _ in 0..self.threads.len() {
            self.shared.depth.post();
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
        tracing::info!("worker pool stopped");
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<T, F>(id: usize, shared: &Shared<T>, handler: &F)
where
    F: Fn(T),
{
    tracing::debug!(worker = id, "worker running");
    loop {
        shared.depth.wait();
        let task = shared.queue.lock().pop_front();
        match task {
            Some(task) => {
                // a panicking task must not take the worker down with it
                if panic::catch_unwind(AssertUnwindSafe(|| handler(task))).is_err() {
                    tracing::error!(worker = id, "task panicked");
                }
            }
            None if shared.closed.load(Ordering::Acquire) => break,
            None => continue,
        }
    }
    tracing::debug!(worker = id, "worker exiting");
}
