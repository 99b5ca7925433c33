//! Deferred work.
//!
//! Some signals must not run in the context that raises them: a
//! transfer completion may fire while the flush path holds a lock the
//! signal would wake. [`WorkQueue`] hands such jobs to a dedicated task
//! that runs them in submission order.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;

/// A deferred job.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Single-consumer queue of deferred jobs backed by one tokio task.
///
/// Cloning yields another producer for the same worker. The worker
/// exits once every producer is dropped and the queue is empty.
#[derive(Clone)]
pub struct WorkQueue {
    name: &'static str,
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl WorkQueue {
    /// Spawn the worker on `runtime`.
    pub fn spawn(name: &'static str, runtime: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_pending = Arc::clone(&pending);
        runtime.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
                worker_pending.fetch_sub(1, Ordering::AcqRel);
            }
            debug!("{name} work queue stopped");
        });

        Self { name, tx, pending }
    }

    /// Queue `job`. Returns the job back if the worker is gone so the
    /// caller can run it itself.
    pub fn push<F>(&self, job: F) -> Result<(), Job>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(Box::new(job)).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            e.0
        })
    }

    /// Jobs queued but not yet run.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}
