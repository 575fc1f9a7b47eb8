//! Tandem worker scheduler
//!
//! Runs independent workers with two interchangeable strategies:
//! - cooperative workers, stackful fibers multiplexed on the scheduler's
//!   thread and advanced one task per [`Scheduler::flush`]
//! - threaded workers, each draining its queue on a dedicated OS thread
//!
//! Producers submit single-shot [`Task`]s through [`WorkerHandle`]s from any
//! thread.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod context;
pub mod queue;
mod runner;
pub mod scheduler;
pub mod signal;
pub mod task;
pub mod thread_worker;
pub mod worker;

pub use queue::TaskQueue;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStats};
pub use task::{Task, WorkerTask};
pub use thread_worker::ThreadWorker;
pub use worker::{ExecutionMode, Worker, WorkerHandle, WorkerId};

use std::time::Duration;

/// Worker and scheduler errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The worker no longer exists
    #[error("{0} has been released")]
    Released(WorkerId),

    /// The worker's queue refused the task
    #[error("task queue of {0} is closed")]
    QueueClosed(WorkerId),

    /// A synchronization barrier did not run in time
    #[error("barrier on {0} did not complete within {1:?}")]
    SyncTimeout(WorkerId, Duration),

    /// Synchronization requested from the worker's own sequence
    #[error("{0} cannot wait for its own queue")]
    SelfSynchronize(WorkerId),

    /// Yield requested on a threaded worker
    #[error("{0} is not a cooperative worker")]
    NotCooperative(WorkerId),

    /// Yield requested outside the worker's own execution context
    #[error("yield outside the execution context of {0}")]
    NotInOwnContext(WorkerId),

    /// Allocating a fiber stack failed
    #[error("failed to allocate fiber stack: {0}")]
    StackAllocation(#[source] std::io::Error),

    /// Spawning a worker thread failed
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}

/// Worker operation result
pub type WorkerResult<T> = Result<T, WorkerError>;

/// A worker that could not be attached, handed back with the reason
#[derive(Debug, thiserror::Error)]
#[error("failed to attach {}: {source}", .worker.id())]
pub struct AttachError {
    worker: Worker,
    #[source]
    source: WorkerError,
}

impl AttachError {
    pub(crate) fn new(worker: Worker, source: WorkerError) -> Self {
        Self { worker, source }
    }

    /// Why attaching failed
    pub fn error(&self) -> &WorkerError {
        &self.source
    }

    /// Take the worker back, with its queued tasks intact
    pub fn into_worker(self) -> Worker {
        self.worker
    }
}

impl From<AttachError> for WorkerError {
    fn from(err: AttachError) -> Self {
        err.source
    }
}
