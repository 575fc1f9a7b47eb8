//! Suspendable execution contexts for cooperative workers
//!
//! Each cooperative worker runs inside its own stackful coroutine. The
//! scheduler's owning thread plays the role of the primary context: resuming a
//! [`FiberContext`] switches onto the worker's stack, and suspending switches
//! back to whoever resumed it.
//!
//! While a fiber is running, the identity of its worker and a pointer to its
//! yielder are published in a thread local so code deep inside a task can find
//! its way back to the primary context.

use crate::worker::WorkerId;
use crate::{WorkerError, WorkerResult};
use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};

/// Where a fiber stopped when it handed control back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Park {
    /// End of a runner turn, between tasks
    Turn,
    /// Voluntary yield from inside a running task
    Voluntary,
}

/// Result of resuming a fiber
pub enum FiberOutcome {
    /// The fiber suspended itself
    Parked(Park),
    /// The fiber's entry function returned
    Finished,
    /// The fiber's entry function panicked; the payload is attached
    Panicked(Box<dyn Any + Send + 'static>),
}

/// Yielder handed to a fiber entry function
pub type FiberYielder = Yielder<(), Park>;

#[derive(Clone, Copy)]
struct ActiveFiber {
    worker: WorkerId,
    yielder: *const FiberYielder,
}

thread_local! {
    static CURRENT: Cell<Option<ActiveFiber>> = const { Cell::new(None) };
}

/// A worker's own stack and the computation bound to it
pub struct FiberContext {
    worker: WorkerId,
    coroutine: Coroutine<(), Park, ()>,
}

impl FiberContext {
    /// Allocate a stack of `stack_size` bytes and bind `entry` to it.
    ///
    /// `entry` does not start running until the first [`resume`](Self::resume).
    pub fn new<F>(worker: WorkerId, stack_size: usize, entry: F) -> WorkerResult<Self>
    where
        F: FnOnce(&FiberYielder) + 'static,
    {
        let stack = DefaultStack::new(stack_size).map_err(WorkerError::StackAllocation)?;
        let coroutine = Coroutine::with_stack(stack, move |yielder: &FiberYielder, ()| {
            CURRENT.with(|current| {
                current.set(Some(ActiveFiber {
                    worker,
                    yielder: yielder as *const FiberYielder,
                }))
            });
            entry(yielder);
        });

        Ok(Self { worker, coroutine })
    }

    /// Worker this context belongs to
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Whether the entry function has returned (or unwound)
    pub fn is_finished(&self) -> bool {
        self.coroutine.done()
    }

    /// Switch into the fiber and run it until it parks, returns or panics
    pub fn resume(&mut self) -> FiberOutcome {
        if self.coroutine.done() {
            return FiberOutcome::Finished;
        }

        let saved = CURRENT.with(Cell::get);
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.coroutine.resume(())));
        CURRENT.with(|current| current.set(saved));

        match result {
            Ok(CoroutineResult::Yield(park)) => FiberOutcome::Parked(park),
            Ok(CoroutineResult::Return(())) => FiberOutcome::Finished,
            Err(payload) => FiberOutcome::Panicked(payload),
        }
    }
}

/// Switch from the running fiber back to the context that resumed it
pub(crate) fn suspend(yielder: &FiberYielder, park: Park) {
    let mine = CURRENT.with(Cell::get);
    yielder.suspend(park);
    CURRENT.with(|current| current.set(mine));
}

/// Worker whose fiber is executing on this thread, if any
pub fn current_worker() -> Option<WorkerId> {
    CURRENT.with(Cell::get).map(|active| active.worker)
}

/// Yield the running fiber if it belongs to `worker`
pub(crate) fn yield_current(worker: WorkerId, park: Park) -> WorkerResult<()> {
    match CURRENT.with(Cell::get) {
        Some(active) if active.worker == worker => {
            // SAFETY: the pointer was published by this fiber's entry function
            // and the yielder outlives every frame running on the fiber's stack.
            let yielder = unsafe { &*active.yielder };
            suspend(yielder, park);
            Ok(())
        }
        _ => Err(WorkerError::NotInOwnContext(worker)),
    }
}

/// Yield whichever fiber is running on this thread. Returns false on the
/// primary context.
pub(crate) fn yield_active(park: Park) -> bool {
    match CURRENT.with(Cell::get) {
        Some(active) => {
            // SAFETY: see `yield_current`.
            let yielder = unsafe { &*active.yielder };
            suspend(yielder, park);
            true
        }
        None => false,
    }
}

/// Extract a printable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    const STACK: usize = 128 * 1024;

    #[test]
    fn test_resume_runs_until_park() {
        let steps = Rc::new(Cell::new(0));
        let inner = steps.clone();
        let id = WorkerId::next();

        let mut fiber = FiberContext::new(id, STACK, move |yielder| {
            inner.set(1);
            suspend(yielder, Park::Turn);
            inner.set(2);
        })
        .unwrap();

        assert_eq!(steps.get(), 0);
        assert!(matches!(fiber.resume(), FiberOutcome::Parked(Park::Turn)));
        assert_eq!(steps.get(), 1);
        assert!(matches!(fiber.resume(), FiberOutcome::Finished));
        assert_eq!(steps.get(), 2);
        assert!(fiber.is_finished());
        assert!(matches!(fiber.resume(), FiberOutcome::Finished));
    }

    #[test]
    fn test_current_worker_only_inside_fiber() {
        let id = WorkerId::next();
        let seen = Rc::new(Cell::new(None));
        let inner = seen.clone();

        let mut fiber = FiberContext::new(id, STACK, move |_| {
            inner.set(current_worker());
        })
        .unwrap();

        assert_eq!(current_worker(), None);
        fiber.resume();
        assert_eq!(seen.get(), Some(id));
        assert_eq!(current_worker(), None);
    }

    #[test]
    fn test_yield_current_rejects_other_worker() {
        let own = WorkerId::next();
        let other = WorkerId::next();
        let rejected = Rc::new(Cell::new(false));
        let inner = rejected.clone();

        let mut fiber = FiberContext::new(own, STACK, move |_| {
            inner.set(yield_current(other, Park::Voluntary).is_err());
            yield_current(own, Park::Voluntary).unwrap();
        })
        .unwrap();

        assert!(matches!(fiber.resume(), FiberOutcome::Parked(Park::Voluntary)));
        assert!(rejected.get());
        assert!(matches!(fiber.resume(), FiberOutcome::Finished));
    }

    #[test]
    fn test_yield_on_primary_is_rejected() {
        let id = WorkerId::next();
        assert!(matches!(
            yield_current(id, Park::Voluntary),
            Err(WorkerError::NotInOwnContext(w)) if w == id
        ));
        assert!(!yield_active(Park::Voluntary));
    }

    #[test]
    fn test_panic_is_reported() {
        let mut fiber = FiberContext::new(WorkerId::next(), STACK, |_| {
            panic!("boom");
        })
        .unwrap();

        match fiber.resume() {
            FiberOutcome::Panicked(payload) => assert_eq!(panic_message(&*payload), "boom"),
            _ => panic!("expected a panic outcome"),
        }
        assert_eq!(current_worker(), None);
    }
}
