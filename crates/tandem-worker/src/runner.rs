//! Runner strategies driving a worker's queue
//!
//! Both loops run until the scheduler's shutdown flag is set and check it only
//! between tasks. A task is never interrupted.

use crate::context::{self, panic_message, FiberYielder, Park};
use crate::scheduler::SchedulerShared;
use crate::signal::{Signal, SignalState};
use crate::worker::WorkerShared;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

/// Body of a cooperative worker's fiber: one turn, then back to the primary
/// context, every time.
pub(crate) fn fiber_runner(
    worker: Arc<WorkerShared>,
    scheduler: Arc<SchedulerShared>,
    yielder: &FiberYielder,
) {
    let handle = worker.handle();
    let idle = scheduler.config().idle_poll_interval;
    tracing::debug!(worker = %worker.id(), "fiber runner started");

    while !scheduler.is_shutting_down() {
        if worker.run_one_turn(&handle, idle) {
            scheduler.record_task();
        }
        context::suspend(yielder, Park::Turn);
    }

    tracing::debug!(worker = %worker.id(), "fiber runner exiting");
}

/// Body of a threaded worker's OS thread. Idle turns block for at most the
/// configured poll interval, so shutdown is noticed promptly.
///
/// Nothing runs until `start` fires, which the spawner does once the worker is
/// attached. An abandoned gate means the attach never happened.
pub(crate) fn thread_runner(
    worker: Arc<WorkerShared>,
    scheduler: Arc<SchedulerShared>,
    start: Arc<Signal>,
) {
    if start.wait() != SignalState::Fired {
        return;
    }

    worker.bind_thread(thread::current().id());
    let handle = worker.handle();
    let idle = scheduler.config().idle_poll_interval;
    tracing::debug!(worker = %worker.id(), "thread runner started");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        while !scheduler.is_shutting_down() {
            if worker.run_one_turn(&handle, idle) {
                scheduler.record_task();
            }
        }
    }));

    match outcome {
        Ok(()) => tracing::debug!(worker = %worker.id(), "thread runner exiting"),
        Err(payload) => {
            let dropped = worker.close();
            scheduler.record_crash();
            tracing::error!(
                worker = %worker.id(),
                dropped,
                "threaded worker stopped by panic: {}",
                panic_message(&*payload)
            );
        }
    }
}
