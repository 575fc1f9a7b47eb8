//! Scheduler owning cooperative and threaded workers

use crate::context::{panic_message, FiberContext, FiberOutcome, Park};
use crate::runner;
use crate::signal::Signal;
use crate::worker::{ExecutionMode, Worker, WorkerHandle, WorkerId};
use crate::{AttachError, WorkerError};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// How long an idle threaded worker waits for a task before re-checking shutdown
pub const DEFAULT_IDLE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Stack size for each cooperative worker
pub const DEFAULT_FIBER_STACK_SIZE: usize = 256 * 1024;

/// Bound on `WorkerHandle::wait_synchronize`
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Name prefix for threaded worker threads
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "tandem-worker";

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Idle wait of a threaded worker between shutdown checks
    pub idle_poll_interval: Duration,

    /// Stack size in bytes for each cooperative worker
    pub fiber_stack_size: usize,

    /// Timeout used by `wait_synchronize`
    pub sync_timeout: Duration,

    /// Threads are named `{prefix}-{worker id}`
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_poll_interval: DEFAULT_IDLE_POLL_INTERVAL,
            fiber_stack_size: DEFAULT_FIBER_STACK_SIZE,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Smaller stacks and a shorter barrier timeout, for many short-lived workers
    pub fn compact() -> Self {
        Self {
            fiber_stack_size: 128 * 1024,
            sync_timeout: Duration::from_millis(500),
            ..Self::default()
        }
    }

    /// Set the idle poll interval
    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }

    /// Set the fiber stack size
    pub fn with_fiber_stack_size(mut self, bytes: usize) -> Self {
        self.fiber_stack_size = bytes;
        self
    }

    /// Set the `wait_synchronize` timeout
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Set the worker thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Calls to `flush`
    pub flushes: u64,

    /// Turns handed to cooperative workers
    pub fiber_turns: u64,

    /// Tasks run by any worker
    pub tasks_executed: u64,

    /// Workers stopped by a panicking task
    pub crashed_workers: usize,
}

/// State reachable from runners and worker back-references
pub(crate) struct SchedulerShared {
    config: SchedulerConfig,
    shutdown: AtomicBool,
    fiber_turns: AtomicU64,
    tasks_executed: AtomicU64,
    crashed_workers: AtomicUsize,
}

impl SchedulerShared {
    pub(crate) fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn record_task(&self) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_crash(&self) {
        self.crashed_workers.fetch_add(1, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FiberStatus {
    Live,
    Finished,
    Crashed,
}

struct FiberSlot {
    context: FiberContext,
    parked: Option<Park>,
    status: FiberStatus,
    worker: Worker,
}

impl FiberSlot {
    fn resume(&mut self, shared: &SchedulerShared) {
        match self.context.resume() {
            FiberOutcome::Parked(park) => {
                self.parked = Some(park);
            }
            FiberOutcome::Finished => {
                self.parked = None;
                self.status = FiberStatus::Finished;
                tracing::debug!(worker = %self.worker.id(), "fiber finished");
            }
            FiberOutcome::Panicked(payload) => {
                self.parked = None;
                self.status = FiberStatus::Crashed;
                let dropped = self.worker.shared().close();
                shared.record_crash();
                tracing::error!(
                    worker = %self.worker.id(),
                    dropped,
                    "cooperative worker stopped by panic: {}",
                    panic_message(&*payload)
                );
            }
        }
    }
}

struct ThreadSlot {
    handle: Option<JoinHandle<()>>,
    worker: Worker,
}

/// Owner of a primary context and a set of child workers.
///
/// The thread that creates a scheduler is its primary context: cooperative
/// workers only ever run on it, inside [`flush`](Scheduler::flush). The type
/// is `!Send`, so it cannot be flushed from anywhere else.
pub struct Scheduler {
    shared: Arc<SchedulerShared>,

    /// Cooperative workers in registration order
    fibers: Vec<FiberSlot>,

    /// Threaded workers and their threads
    threads: Vec<ThreadSlot>,

    owner: ThreadId,

    flushes: u64,

    _primary: PhantomData<*const ()>,
}

impl Scheduler {
    /// Create a scheduler on the calling thread with default configuration
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler on the calling thread
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                config,
                shutdown: AtomicBool::new(false),
                fiber_turns: AtomicU64::new(0),
                tasks_executed: AtomicU64::new(0),
                crashed_workers: AtomicUsize::new(0),
            }),
            fibers: Vec::new(),
            threads: Vec::new(),
            owner: thread::current().id(),
            flushes: 0,
            _primary: PhantomData,
        }
    }

    /// Take ownership of a detached worker and start driving it.
    ///
    /// A cooperative worker gets its own fiber, bound to this thread. A
    /// threaded worker gets a new OS thread. Returns a handle for submitting
    /// tasks, valid for as long as the scheduler lives.
    ///
    /// If the stack or thread cannot be created, the worker comes back inside
    /// the error, still detached and with its queue untouched.
    pub fn add_child_worker(&mut self, worker: Worker) -> Result<WorkerHandle, AttachError> {
        let handle = worker.handle();

        match worker.execution_mode() {
            ExecutionMode::Cooperative => {
                let runner_worker = worker.shared().clone();
                let scheduler = self.shared.clone();
                let context = match FiberContext::new(
                    worker.id(),
                    self.shared.config.fiber_stack_size,
                    move |yielder| runner::fiber_runner(runner_worker, scheduler, yielder),
                ) {
                    Ok(context) => context,
                    Err(err) => return Err(AttachError::new(worker, err)),
                };

                worker.attach(&self.shared);
                worker.shared().bind_thread(self.owner);
                tracing::debug!(worker = %worker.id(), "attached cooperative worker");

                self.fibers.push(FiberSlot {
                    context,
                    parked: None,
                    status: FiberStatus::Live,
                    worker,
                });
            }
            ExecutionMode::Threaded => {
                let runner_worker = worker.shared().clone();
                let scheduler = self.shared.clone();
                let (gate, start) = Signal::new();
                let spawned = thread::Builder::new()
                    .name(format!(
                        "{}-{}",
                        self.shared.config.thread_name_prefix,
                        worker.id().as_u64()
                    ))
                    .spawn(move || runner::thread_runner(runner_worker, scheduler, gate));
                let join = match spawned {
                    Ok(join) => join,
                    Err(err) => {
                        return Err(AttachError::new(worker, WorkerError::ThreadSpawn(err)))
                    }
                };

                worker.attach(&self.shared);
                worker.shared().bind_thread(join.thread().id());
                start.notify();
                tracing::debug!(worker = %worker.id(), "attached threaded worker");

                self.threads.push(ThreadSlot {
                    handle: Some(join),
                    worker,
                });
            }
        }

        Ok(handle)
    }

    /// Give every cooperative worker one turn, in registration order.
    ///
    /// Returns once each of them has yielded back. Threaded workers are not
    /// affected.
    pub fn flush(&mut self) {
        self.flushes += 1;

        for slot in &mut self.fibers {
            if slot.status != FiberStatus::Live {
                continue;
            }
            self.shared.fiber_turns.fetch_add(1, Ordering::Relaxed);
            slot.resume(&self.shared);
        }
    }

    /// Configuration the scheduler was created with
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Thread acting as the primary context
    pub fn owner_thread(&self) -> ThreadId {
        self.owner
    }

    /// Number of cooperative workers
    pub fn cooperative_count(&self) -> usize {
        self.fibers.len()
    }

    /// Number of threaded workers
    pub fn threaded_count(&self) -> usize {
        self.threads.len()
    }

    /// Number of attached workers
    pub fn worker_count(&self) -> usize {
        self.fibers.len() + self.threads.len()
    }

    /// IDs of cooperative workers in flush order
    pub fn cooperative_workers(&self) -> Vec<WorkerId> {
        self.fibers.iter().map(|slot| slot.worker.id()).collect()
    }

    /// Snapshot of scheduler counters
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            flushes: self.flushes,
            fiber_turns: self.shared.fiber_turns.load(Ordering::Relaxed),
            tasks_executed: self.shared.tasks_executed.load(Ordering::Relaxed),
            crashed_workers: self.shared.crashed_workers.load(Ordering::Acquire),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        tracing::info!(
            cooperative = self.fibers.len(),
            threaded = self.threads.len(),
            "scheduler shutting down"
        );

        // Fibers parked between tasks see the flag on their next turn and
        // return. Fibers parked inside a task are unwound when released below.
        for slot in &mut self.fibers {
            if slot.status == FiberStatus::Live && slot.parked == Some(Park::Turn) {
                slot.resume(&self.shared);
            }
        }

        // Released before the joins: a threaded task blocked on a fiber's
        // barrier wakes with `Released` once that fiber's queue is gone.
        for slot in self.fibers.drain(..) {
            let FiberSlot {
                context, worker, ..
            } = slot;
            drop(context);
            drop(worker);
        }

        for slot in &mut self.threads {
            if let Some(handle) = slot.handle.take() {
                if handle.join().is_err() {
                    tracing::warn!(worker = %slot.worker.id(), "worker thread panicked");
                }
            }
        }
        self.threads.clear();
    }
}
