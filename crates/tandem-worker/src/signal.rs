//! One-shot completion signal used by synchronization barriers

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State of a [`Signal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    /// Not fired yet
    Pending,
    /// The notifier fired
    Fired,
    /// The notifier was dropped without firing
    Abandoned,
}

/// Waiting side of a one-shot signal
pub struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

/// Firing side of a one-shot signal.
///
/// Dropping it without calling [`Notifier::notify`] marks the signal
/// abandoned and wakes any waiter.
pub struct Notifier {
    signal: Arc<Signal>,
    fired: bool,
}

impl Signal {
    /// Create a connected signal/notifier pair
    pub fn new() -> (Arc<Signal>, Notifier) {
        let signal = Arc::new(Signal {
            state: Mutex::new(SignalState::Pending),
            cond: Condvar::new(),
        });
        let notifier = Notifier {
            signal: signal.clone(),
            fired: false,
        };
        (signal, notifier)
    }

    /// Current state, without blocking
    pub fn try_wait(&self) -> SignalState {
        *self.state.lock()
    }

    /// Block until the signal leaves `Pending` or `timeout` elapses.
    ///
    /// A timeout too large to express as a deadline waits without one.
    pub fn wait_timeout(&self, timeout: Duration) -> SignalState {
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => return self.wait(),
        };
        let mut state = self.state.lock();
        while *state == SignalState::Pending {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state
    }

    /// Block until the signal leaves `Pending`
    pub fn wait(&self) -> SignalState {
        let mut state = self.state.lock();
        while *state == SignalState::Pending {
            self.cond.wait(&mut state);
        }
        *state
    }

    fn settle(&self, outcome: SignalState) {
        let mut state = self.state.lock();
        if *state == SignalState::Pending {
            *state = outcome;
            self.cond.notify_all();
        }
    }
}

impl Notifier {
    /// Fire the signal
    pub fn notify(mut self) {
        self.fired = true;
        self.signal.settle(SignalState::Fired);
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        if !self.fired {
            self.signal.settle(SignalState::Abandoned);
        }
    }
}
