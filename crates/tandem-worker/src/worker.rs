//! Workers: one logical actor with its own task queue
//!
//! A [`Worker`] is created detached, then moved into a
//! [`Scheduler`](crate::Scheduler) which owns it for the rest of its life.
//! Producers talk to it through [`WorkerHandle`]s, which do not keep the
//! worker alive.

use crate::context::{self, Park};
use crate::queue::TaskQueue;
use crate::scheduler::{SchedulerShared, DEFAULT_SYNC_TIMEOUT};
use crate::signal::{Signal, SignalState};
use crate::task::{Task, WorkerTask};
use crate::{WorkerError, WorkerResult};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// How a worker's tasks get executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Multiplexed on the scheduler's thread, advanced by `Scheduler::flush`
    Cooperative,
    /// Runs freely on a dedicated OS thread
    Threaded,
}

/// Unique identifier for a worker
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

impl WorkerId {
    pub(crate) fn next() -> Self {
        WorkerId(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// State shared between a worker, its runner and its handles
pub(crate) struct WorkerShared {
    id: WorkerId,
    mode: ExecutionMode,
    queue: TaskQueue<WorkerTask>,
    /// Back-reference to the owning scheduler, set once at attach
    scheduler: OnceCell<Weak<SchedulerShared>>,
    /// Thread this worker's tasks run on
    sequence_thread: OnceCell<ThreadId>,
}

impl WorkerShared {
    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn handle(self: &Arc<Self>) -> WorkerHandle {
        WorkerHandle {
            id: self.id,
            mode: self.mode,
            shared: Arc::downgrade(self),
        }
    }

    pub(crate) fn bind_thread(&self, thread: ThreadId) {
        // Either the spawner or the runner gets here first; both agree.
        let _ = self.sequence_thread.set(thread);
    }

    fn runs_on_current_thread(&self) -> bool {
        self.sequence_thread.get() == Some(&thread::current().id())
    }

    fn is_attached(&self) -> bool {
        self.scheduler.get().is_some()
    }

    fn sync_timeout(&self) -> Duration {
        self.scheduler
            .get()
            .and_then(Weak::upgrade)
            .map(|scheduler| scheduler.config().sync_timeout)
            .unwrap_or(DEFAULT_SYNC_TIMEOUT)
    }

    /// Refuse further tasks and drop the ones still queued, abandoning any
    /// pending barriers. Returns how many tasks were dropped.
    pub(crate) fn close(&self) -> usize {
        self.queue.close();
        std::iter::from_fn(|| self.queue.try_dequeue()).count()
    }

    /// Dequeue and run at most one task. Threaded workers wait up to `idle`
    /// for work; cooperative workers never block.
    ///
    /// Returns whether a task ran.
    pub(crate) fn run_one_turn(&self, handle: &WorkerHandle, idle: Duration) -> bool {
        let task = match self.mode {
            ExecutionMode::Threaded => self.queue.wait_dequeue_timed(idle),
            ExecutionMode::Cooperative => self.queue.try_dequeue(),
        };

        match task {
            Some(task) => {
                tracing::trace!(worker = %self.id, "running task");
                task.run(handle);
                true
            }
            None => false,
        }
    }
}

/// An owned, not yet (or already) attached worker
pub struct Worker {
    shared: Arc<WorkerShared>,
}

impl Worker {
    /// Create a detached worker
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                id: WorkerId::next(),
                mode,
                queue: TaskQueue::new(),
                scheduler: OnceCell::new(),
                sequence_thread: OnceCell::new(),
            }),
        }
    }

    /// Shorthand for `Worker::new(ExecutionMode::Cooperative)`
    pub fn cooperative() -> Self {
        Self::new(ExecutionMode::Cooperative)
    }

    /// Shorthand for `Worker::new(ExecutionMode::Threaded)`
    pub fn threaded() -> Self {
        Self::new(ExecutionMode::Threaded)
    }

    /// Get the worker ID
    pub fn id(&self) -> WorkerId {
        self.shared.id
    }

    /// Execution mode, fixed at construction
    pub fn execution_mode(&self) -> ExecutionMode {
        self.shared.mode
    }

    /// Whether the worker has been added to a scheduler
    pub fn is_attached(&self) -> bool {
        self.shared.is_attached()
    }

    /// Non-owning handle for submitting work.
    ///
    /// Tasks submitted before the worker is attached wait in its queue.
    pub fn handle(&self) -> WorkerHandle {
        self.shared.handle()
    }

    pub(crate) fn shared(&self) -> &Arc<WorkerShared> {
        &self.shared
    }

    /// Record the owning scheduler. Called once, by `Scheduler::add_child_worker`.
    pub(crate) fn attach(&self, scheduler: &Arc<SchedulerShared>) {
        let attached = self.shared.scheduler.set(Arc::downgrade(scheduler)).is_ok();
        debug_assert!(attached, "{} attached twice", self.shared.id);
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.shared.id)
            .field("mode", &self.shared.mode)
            .field("attached", &self.shared.is_attached())
            .field("queued", &self.shared.queue.len())
            .finish()
    }
}

/// Non-owning reference to a worker.
///
/// Cheap to clone and usable from any thread. Once the owning scheduler is
/// dropped, operations fail with [`WorkerError::Released`].
#[derive(Clone)]
pub struct WorkerHandle {
    id: WorkerId,
    mode: ExecutionMode,
    shared: Weak<WorkerShared>,
}

impl WorkerHandle {
    fn upgrade(&self) -> WorkerResult<Arc<WorkerShared>> {
        self.shared.upgrade().ok_or(WorkerError::Released(self.id))
    }

    /// Get the worker ID
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Execution mode of the worker
    pub fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Whether the worker has been added to a scheduler and is still alive
    pub fn is_attached(&self) -> bool {
        self.shared
            .upgrade()
            .map(|shared| shared.is_attached())
            .unwrap_or(false)
    }

    /// Whether the worker has been destroyed
    pub fn is_released(&self) -> bool {
        self.shared.strong_count() == 0
    }

    /// Queue a task. Wakes the worker's thread if it is idle.
    ///
    /// Fails with [`WorkerError::QueueClosed`] once a panic has stopped the
    /// worker.
    pub fn submit(&self, task: WorkerTask) -> WorkerResult<()> {
        self.upgrade()?
            .queue
            .enqueue(task)
            .map_err(|_| WorkerError::QueueClosed(self.id))
    }

    /// Queue a closure as a task
    pub fn post<F>(&self, f: F) -> WorkerResult<()>
    where
        F: FnOnce(&WorkerHandle) + Send + 'static,
    {
        self.submit(Task::new(f))
    }

    /// Drop `value` on the worker, after every task queued before it.
    ///
    /// If the task cannot be queued, `value` is dropped on the calling thread.
    pub fn delete_soon<T>(&self, value: T) -> WorkerResult<()>
    where
        T: Send + 'static,
    {
        self.post(move |_| drop(value))
    }

    /// Wait until every task queued before this call has finished, using the
    /// scheduler's configured timeout.
    pub fn wait_synchronize(&self) -> WorkerResult<()> {
        let timeout = self.upgrade()?.sync_timeout();
        self.wait_synchronize_timeout(timeout)
    }

    /// Queue a barrier task and wait up to `timeout` for it to run.
    ///
    /// How the caller waits depends on where it runs:
    /// - inside another cooperative worker, it yields its own fiber between
    ///   checks so the shared thread keeps moving;
    /// - on the scheduler thread, targeting a cooperative worker, it checks
    ///   once without blocking, since the barrier cannot run before the next
    ///   flush;
    /// - anywhere else it blocks.
    ///
    /// Calling it from the worker's own sequence is rejected, as the barrier
    /// could never run.
    pub fn wait_synchronize_timeout(&self, timeout: Duration) -> WorkerResult<()> {
        let shared = self.upgrade()?;
        let current_fiber = context::current_worker();

        let own_sequence = match self.mode {
            ExecutionMode::Cooperative => current_fiber == Some(self.id),
            ExecutionMode::Threaded => shared.runs_on_current_thread(),
        };
        if own_sequence {
            return Err(WorkerError::SelfSynchronize(self.id));
        }

        let (signal, notifier) = Signal::new();
        shared
            .queue
            .enqueue(Task::new(move |_| notifier.notify()))
            .map_err(|_| WorkerError::QueueClosed(self.id))?;

        let on_scheduler_thread =
            self.mode == ExecutionMode::Cooperative && shared.runs_on_current_thread();
        // Holding the worker alive while waiting would keep an abandoned
        // barrier from ever being noticed.
        drop(shared);

        let state = if current_fiber.is_some() {
            let deadline = Instant::now().checked_add(timeout);
            loop {
                let state = signal.try_wait();
                let expired = deadline.is_some_and(|deadline| Instant::now() >= deadline);
                if state != SignalState::Pending || expired {
                    break state;
                }
                context::yield_active(Park::Voluntary);
            }
        } else if on_scheduler_thread {
            signal.try_wait()
        } else {
            signal.wait_timeout(timeout)
        };

        match state {
            SignalState::Fired => Ok(()),
            SignalState::Pending => Err(WorkerError::SyncTimeout(self.id, timeout)),
            SignalState::Abandoned => Err(WorkerError::Released(self.id)),
        }
    }

    /// Hand control back to the scheduler's primary context.
    ///
    /// Only valid for a cooperative worker, from inside one of its own tasks.
    pub fn yield_now(&self) -> WorkerResult<()> {
        if self.mode != ExecutionMode::Cooperative {
            return Err(WorkerError::NotCooperative(self.id));
        }
        context::yield_current(self.id, Park::Voluntary)
    }

    /// Whether the calling thread is the one this worker's tasks run on
    pub fn runs_tasks_in_current_sequence(&self) -> bool {
        self.shared
            .upgrade()
            .map(|shared| shared.runs_on_current_thread())
            .unwrap_or(false)
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("released", &self.is_released())
            .finish()
    }
}
