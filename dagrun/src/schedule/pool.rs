//! Bounded OS-thread worker pool.
//!
//! Capability work is blocking (network calls, subprocesses), so the pool
//! is plain threads over a channel rather than an async runtime. Dropping
//! the pool closes the channel and joins every worker, so a pool going out
//! of scope is a full drain.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Default worker count: twice the available parallelism, capped at 32.
pub fn default_workers() -> usize {
    let cpus = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    (cpus * 2).min(32)
}

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..size)
            .map(|id| spawn_worker(id, Arc::clone(&receiver)))
            .collect();
        debug!(size, "worker pool started");
        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Queue a job. Jobs run in submission order per worker, concurrently
    /// across workers.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(sender) = &self.sender
            && sender.send(Box::new(job)).is_err()
        {
            debug!("worker pool already shut down; job dropped");
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the sending side ends every worker's recv loop.
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                debug!("worker exited via panic");
            }
        }
    }
}

fn spawn_worker(id: usize, receiver: Arc<Mutex<Receiver<Job>>>) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("dagrun-worker-{id}"))
        .spawn(move || {
            loop {
                let job = receiver
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .recv();
                match job {
                    // A panicking job must not retire the worker.
                    Ok(job) => {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            warn!(worker = id, "job panicked");
                        }
                    }
                    Err(_) => break,
                }
            }
        })
        .unwrap_or_else(|e| panic!("failed to spawn worker thread: {e}"))
}
