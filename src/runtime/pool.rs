//! Fixed-size worker pool with round-robin assignment.

use crate::error::ServerError;
use crate::runtime::worker::Worker;
use tracing::info;

/// Fixed set of workers plus the round-robin cursor.
///
/// Selection is strict round-robin, independent of worker load. That
/// trades optimal balance for predictability: after `k` accepted
/// connections, connection `i` lives on worker `i % len`.
pub struct WorkerPool {
    workers: Vec<Worker>,
    cursor: usize,
}

impl WorkerPool {
    /// Start `size` workers, or one per detected core when `size` is 0
    /// (minimum 1). Workers start sequentially; if any fails, every
    /// already-started worker is stopped and joined before the error is
    /// returned, so a partially-live pool never escapes.
    pub fn open(size: usize) -> Result<Self, ServerError> {
        let size = if size == 0 {
            detected_parallelism()
        } else {
            size
        };
        info!(workers = size, "starting worker pool");

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            match Worker::start(id) {
                Ok(worker) => workers.push(worker),
                Err(source) => {
                    for worker in &workers {
                        worker.stop();
                    }
                    for worker in &mut workers {
                        worker.join();
                    }
                    return Err(ServerError::PoolStartup { worker: id, source });
                }
            }
        }

        Ok(Self { workers, cursor: 0 })
    }

    /// Next worker in round-robin order. Only the accept thread calls
    /// this, which is why the cursor carries no synchronization.
    pub fn next(&mut self) -> &Worker {
        let worker = &self.workers[self.cursor];
        self.cursor = (self.cursor + 1) % self.workers.len();
        worker
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Signal every worker to stop, then join each thread in turn.
    /// Blocks until all workers have exited. Idempotent.
    pub fn close(&mut self) {
        for worker in &self.workers {
            worker.stop();
        }
        for worker in &mut self.workers {
            worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

fn detected_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
