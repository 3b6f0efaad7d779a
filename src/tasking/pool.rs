//! Bounded worker pool for background tasks.
//!
//! A fixed set of threads pulls jobs off one shared channel, so the number of
//! concurrently running background tasks never exceeds the pool size.

use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::util::{Error, Result};
use super::task::QueueKind;

/// Type-erased job executed on a worker thread.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Commands sent to worker threads.
enum WorkerCommand {
    /// Run a job.
    Run(Job),
    /// Stop the receiving worker.
    Stop,
}

/// Handle to the pool threads.
pub(crate) struct WorkerPool {
    /// Job sender; `None` after shutdown.
    tx: Mutex<Option<Sender<WorkerCommand>>>,
    /// Thread handles for cleanup.
    handles: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` worker threads.
    pub fn spawn(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::invalid("worker pool needs at least one thread"));
        }

        let (tx, rx) = channel::<WorkerCommand>();
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(size);
        for i in 0..size {
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("pht-worker-{i}"))
                .spawn(move || worker_loop(rx))?;
            handles.push(handle);
        }
        tracing::debug!(threads = size, "worker pool started");

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
            size,
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Check if the pool still accepts jobs.
    pub fn is_running(&self) -> bool {
        self.tx.lock().is_some()
    }

    /// Queue a job for the next free worker.
    pub fn execute(&self, job: Job) -> Result<()> {
        let tx = self.tx.lock();
        match tx.as_ref() {
            Some(tx) => tx
                .send(WorkerCommand::Run(job))
                .map_err(|_| Error::QueueClosed(QueueKind::Background)),
            None => Err(Error::QueueClosed(QueueKind::Background)),
        }
    }

    /// Stop all workers after their current job and join them.
    ///
    /// Jobs already queued ahead of the stop commands still run.
    pub fn shutdown(&self) {
        let Some(tx) = self.tx.lock().take() else {
            return;
        };
        for _ in 0..self.size {
            let _ = tx.send(WorkerCommand::Stop);
        }
        drop(tx);

        let current = thread::current().id();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            // The last scheduler reference may be released by a job on a worker.
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
        tracing::debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Main worker loop - runs in a pool thread.
fn worker_loop(rx: Arc<Mutex<Receiver<WorkerCommand>>>) {
    loop {
        let cmd = match rx.lock().recv() {
            Ok(cmd) => cmd,
            Err(_) => break, // Channel closed
        };

        match cmd {
            WorkerCommand::Run(job) => job(),
            WorkerCommand::Stop => break,
        }
    }
}
