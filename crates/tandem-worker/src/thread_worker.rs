//! Standalone worker owning a dedicated thread
//!
//! Unlike a threaded [`Worker`](crate::Worker), a `ThreadWorker` needs no
//! scheduler: it starts its thread on creation and joins it on drop. Tasks
//! take no arguments and synchronization blocks without a timeout.
//!
//! The associated functions taking `Option<&ThreadWorker>` treat a missing
//! worker as the current thread: work runs inline, synchronization is a no-op.

use crate::context::panic_message;
use crate::queue::TaskQueue;
use crate::scheduler::SchedulerConfig;
use crate::signal::{Signal, SignalState};
use crate::task::Task;
use crate::worker::WorkerId;
use crate::{WorkerError, WorkerResult};
use once_cell::sync::OnceCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

struct ThreadWorkerShared {
    id: WorkerId,
    queue: TaskQueue<Task<()>>,
    quit: AtomicBool,
    thread: OnceCell<ThreadId>,
}

impl ThreadWorkerShared {
    fn run(&self, idle: Duration) {
        let _ = self.thread.set(thread::current().id());
        tracing::debug!(worker = %self.id, "thread worker started");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            while !self.quit.load(Ordering::Acquire) {
                if let Some(task) = self.queue.wait_dequeue_timed(idle) {
                    task.run(&());
                }
            }
        }));

        match outcome {
            Ok(()) => tracing::debug!(worker = %self.id, "thread worker exiting"),
            Err(payload) => {
                self.queue.close();
                let dropped = std::iter::from_fn(|| self.queue.try_dequeue()).count();
                tracing::error!(
                    worker = %self.id,
                    dropped,
                    "thread worker stopped by panic: {}",
                    panic_message(&*payload)
                );
            }
        }
    }
}

/// Worker with its own thread and lifetime
pub struct ThreadWorker {
    shared: Arc<ThreadWorkerShared>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadWorker {
    /// Start a worker thread with default configuration
    pub fn spawn() -> WorkerResult<Self> {
        Self::spawn_with(&SchedulerConfig::default())
    }

    /// Start a worker thread using the idle interval and naming from `config`
    pub fn spawn_with(config: &SchedulerConfig) -> WorkerResult<Self> {
        let shared = Arc::new(ThreadWorkerShared {
            id: WorkerId::next(),
            queue: TaskQueue::new(),
            quit: AtomicBool::new(false),
            thread: OnceCell::new(),
        });

        let runner = shared.clone();
        let idle = config.idle_poll_interval;
        let handle = thread::Builder::new()
            .name(format!("{}-{}", config.thread_name_prefix, shared.id.as_u64()))
            .spawn(move || runner.run(idle))
            .map_err(WorkerError::ThreadSpawn)?;

        let _ = shared.thread.set(handle.thread().id());

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Get the worker ID
    pub fn id(&self) -> WorkerId {
        self.shared.id
    }

    /// Queue a closure to run on the worker thread.
    ///
    /// Fails with [`WorkerError::QueueClosed`] once a panicking task has
    /// stopped the thread.
    pub fn post_task<F>(&self, f: F) -> WorkerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared
            .queue
            .enqueue(Task::new(move |_: &()| f()))
            .map_err(|_| WorkerError::QueueClosed(self.shared.id))
    }

    /// Queue `f` on `worker`, or run it right here when there is none
    pub fn post_task_or_run<F>(worker: Option<&ThreadWorker>, f: F) -> WorkerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        match worker {
            Some(worker) => worker.post_task(f),
            None => {
                f();
                Ok(())
            }
        }
    }

    /// Block until every task queued before this call has run.
    ///
    /// Returns [`WorkerError::Released`] if the thread stops before reaching
    /// the barrier.
    pub fn wait_synchronize(&self) -> WorkerResult<()> {
        if self.runs_tasks_in_current_sequence() {
            return Err(WorkerError::SelfSynchronize(self.shared.id));
        }

        let (signal, notifier) = Signal::new();
        self.post_task(move || notifier.notify())?;

        match signal.wait() {
            SignalState::Fired => Ok(()),
            SignalState::Pending | SignalState::Abandoned => {
                Err(WorkerError::Released(self.shared.id))
            }
        }
    }

    /// Synchronize with `worker`; nothing to wait for when there is none
    pub fn wait_synchronize_or_skip(worker: Option<&ThreadWorker>) -> WorkerResult<()> {
        match worker {
            Some(worker) => worker.wait_synchronize(),
            None => Ok(()),
        }
    }

    /// Whether the calling thread is this worker's thread
    pub fn runs_tasks_in_current_sequence(&self) -> bool {
        self.shared.thread.get() == Some(&thread::current().id())
    }

    /// Whether work posted through `worker` runs on the calling thread.
    /// Always true without a worker, since such work runs inline.
    pub fn runs_tasks_in_sequence_of(worker: Option<&ThreadWorker>) -> bool {
        worker.is_none_or(ThreadWorker::runs_tasks_in_current_sequence)
    }

    /// Drop `value` on the worker thread
    pub fn delete_soon<T>(&self, value: T) -> WorkerResult<()>
    where
        T: Send + 'static,
    {
        self.post_task(move || drop(value))
    }

    /// Drop `value` on `worker`, or right here when there is none
    pub fn delete_soon_or_drop<T>(worker: Option<&ThreadWorker>, value: T) -> WorkerResult<()>
    where
        T: Send + 'static,
    {
        match worker {
            Some(worker) => worker.delete_soon(value),
            None => {
                drop(value);
                Ok(())
            }
        }
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        self.shared.quit.store(true, Ordering::Release);

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(worker = %self.shared.id, "thread worker panicked");
            }
        }
    }
}
