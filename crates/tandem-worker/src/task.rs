//! Single-shot task closures

use crate::worker::WorkerHandle;
use std::fmt;

/// A deferred unit of work, run at most once with a borrowed argument.
///
/// `run` takes `self` by value, so a task is consumed by its invocation and
/// cannot be run twice. A task that is never run is simply dropped along with
/// whatever state it captured.
pub struct Task<A: ?Sized> {
    f: Box<dyn FnOnce(&A) + Send + 'static>,
}

/// Task executed by a [`Worker`](crate::Worker), receiving the worker's handle
pub type WorkerTask = Task<WorkerHandle>;

impl<A: ?Sized> Task<A> {
    /// Wrap a closure into a task
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&A) + Send + 'static,
    {
        Self { f: Box::new(f) }
    }

    /// Invoke the task, consuming it
    pub fn run(self, arg: &A) {
        (self.f)(arg)
    }
}

impl<A: ?Sized> fmt::Debug for Task<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}
