//! Single-assignment promise.
//!
//! One mutex guards the state, one condition variable is signaled on every
//! terminal transition. The state machine is monotonic:
//!
//! ```text
//! Pending ──fulfil──▶ Fulfilled
//!    │  └───break_with──▶ Broken
//!    └───cancel──▶ Cancelled
//! ```
//!
//! Exactly one transition occurs over the promise's lifetime. `wait` and
//! `try_wait` never transition; only `fulfil`, `break_with`, and `cancel` do.

use std::sync::{Condvar, Mutex};

use thiserror::Error;

/// Error returned by [`Promise::fulfil`] and [`Promise::break_with`] when the
/// promise has already reached a terminal state. The promise is unchanged;
/// first writer wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("promise already settled")]
pub struct AlreadySettled;

/// Terminal snapshot of a promise, as observed by a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The producer published a value.
    Fulfilled(T),
    /// The producer reported failure with an error code.
    Broken(i32),
    /// The promise was cancelled before anyone settled it.
    Cancelled,
}

enum State<T> {
    /// Not yet settled. `waiting` counts threads blocked in `wait`; it only
    /// decides whether a terminal transition broadcasts, so it must never
    /// read zero while a waiter exists.
    Pending { waiting: usize },
    Fulfilled(T),
    Broken(i32),
    Cancelled,
}

/// A cross-thread single-assignment future.
///
/// Safe for one producer and any number of concurrent consumers. Share it
/// across threads with `Arc<Promise<T>>`.
pub struct Promise<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

impl<T> Promise<T> {
    /// Create a pending promise.
    pub fn new() -> Self {
        Promise {
            state: Mutex::new(State::Pending { waiting: 0 }),
            cond: Condvar::new(),
        }
    }

    /// Settle the promise with a value.
    ///
    /// Returns [`AlreadySettled`] (and changes nothing) if the promise has
    /// already been fulfilled, broken, or cancelled. Wakes every thread
    /// currently blocked in [`wait`](Self::wait).
    pub fn fulfil(&self, value: T) -> Result<(), AlreadySettled> {
        let mut state = self.state.lock().unwrap();
        match *state {
            State::Pending { waiting } => {
                *state = State::Fulfilled(value);
                if waiting > 0 {
                    self.cond.notify_all();
                }
                Ok(())
            }
            _ => Err(AlreadySettled),
        }
    }

    /// Settle the promise with an error code.
    ///
    /// Symmetric to [`fulfil`](Self::fulfil): only legal while pending.
    pub fn break_with(&self, code: i32) -> Result<(), AlreadySettled> {
        let mut state = self.state.lock().unwrap();
        match *state {
            State::Pending { waiting } => {
                *state = State::Broken(code);
                if waiting > 0 {
                    self.cond.notify_all();
                }
                Ok(())
            }
            _ => Err(AlreadySettled),
        }
    }

    /// Force-cancel a pending promise, waking every blocked waiter.
    ///
    /// This is the abandonment path: a consumer blocked in `wait` on a
    /// promise the producer will never settle still observes a terminal
    /// state once `cancel` runs. Cancelling an already-settled promise is a
    /// no-op; it is not a second transition.
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        if let State::Pending { waiting } = *state {
            *state = State::Cancelled;
            if waiting > 0 {
                self.cond.notify_all();
            }
        }
    }
}

impl<T: Clone> Promise<T> {
    /// Block until the promise settles and return the terminal snapshot.
    ///
    /// There is no timeout and no consumer-side cancellation: the calling
    /// thread is committed until a terminal transition happens, including
    /// one caused by [`cancel`](Self::cancel). Callers needing a bounded
    /// wait must arrange one externally, e.g. a timer that calls
    /// [`break_with`](Self::break_with).
    pub fn wait(&self) -> Outcome<T> {
        let mut state = self.state.lock().unwrap();
        if let State::Pending { waiting } = &mut *state {
            *waiting += 1;
        }
        loop {
            match outcome_of(&state) {
                Some(outcome) => return outcome,
                None => state = self.cond.wait(state).unwrap(),
            }
        }
    }

    /// Non-blocking poll.
    ///
    /// Returns `Some(outcome)` if the lock was free and the promise is
    /// settled. Returns `None` if the promise is still pending, **or** if
    /// the lock is momentarily held by another operation. A `None` from
    /// `try_wait` is an inconclusive reading, not proof the promise is
    /// unsettled; never treat it as equivalent to a [`wait`](Self::wait)
    /// result.
    pub fn try_wait(&self) -> Option<Outcome<T>> {
        match self.state.try_lock() {
            Ok(state) => outcome_of(&state),
            Err(_) => None,
        }
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn outcome_of<T: Clone>(state: &State<T>) -> Option<Outcome<T>> {
    match state {
        State::Pending { .. } => None,
        State::Fulfilled(value) => Some(Outcome::Fulfilled(value.clone())),
        State::Broken(code) => Some(Outcome::Broken(*code)),
        State::Cancelled => Some(Outcome::Cancelled),
    }
}
