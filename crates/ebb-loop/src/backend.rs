//! Backend poller wrapper.
//!
//! Owns the OS readiness multiplexer and the two queues that non-loop
//! threads push into: wakeup notifications and resolver completions. The
//! reactor asks it to wait once per cycle; everything cross-thread funnels
//! through [`Shared`], which lives behind an `Arc` so senders and worker
//! threads can outlive the loop.

use std::cell::Cell;
use std::io;
use std::os::fd::BorrowedFd;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::{Arc, Weak};
use std::time::Duration;

use concurrent_queue::ConcurrentQueue;
use polling::{Event, Events, Poller};

use crate::resolve::Completion;
use crate::wakeup::WakeupGate;

/// State reachable from other threads: the poller (for `notify`) and the
/// inbound queues drained by the loop after each wait.
pub(crate) struct Shared {
    pub(crate) poller: Poller,
    pub(crate) woken: ConcurrentQueue<Weak<WakeupGate>>,
    pub(crate) completions: ConcurrentQueue<Completion>,
}

pub(crate) struct Backend {
    shared: Arc<Shared>,
    events: Events,
    /// Reference count consulted by `wait`. At zero the wait degenerates to
    /// an immediate-return poll; the loop holds a [`BusyGuard`] across the
    /// call so that state is never observable mid-cycle.
    refs: Rc<Cell<usize>>,
    ready: Vec<(usize, bool, bool)>,
}

/// Scoped busy marker around the backend wait. The count drops on every
/// exit path, including error returns.
pub(crate) struct BusyGuard {
    refs: Rc<Cell<usize>>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.refs.set(self.refs.get() - 1);
    }
}

impl Backend {
    pub(crate) fn new() -> io::Result<Backend> {
        Ok(Backend {
            shared: Arc::new(Shared {
                poller: Poller::new()?,
                woken: ConcurrentQueue::unbounded(),
                completions: ConcurrentQueue::unbounded(),
            }),
            events: Events::new(),
            refs: Rc::new(Cell::new(0)),
            ready: Vec::new(),
        })
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        self.shared.clone()
    }

    pub(crate) fn hold(&self) -> BusyGuard {
        self.refs.set(self.refs.get() + 1);
        BusyGuard {
            refs: self.refs.clone(),
        }
    }

    /// Wait for readiness, timers permitting. `None` blocks until an event
    /// or a `notify`; `Some(Duration::ZERO)` is a non-blocking sweep.
    pub(crate) fn wait(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let timeout = if self.refs.get() == 0 {
            Some(Duration::ZERO)
        } else {
            timeout
        };
        self.events.clear();
        match self.shared.poller.wait(&mut self.events, timeout) {
            Ok(_) => {}
            // A signal cut the wait short; deliver whatever we have.
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
        self.ready = self
            .events
            .iter()
            .map(|ev| (ev.key, ev.readable, ev.writable))
            .collect();
        Ok(())
    }

    /// Take the readiness events collected by the last `wait`.
    pub(crate) fn take_ready(&mut self) -> Vec<(usize, bool, bool)> {
        std::mem::take(&mut self.ready)
    }

    /// First registration of an fd. Unsafe in the underlying poller because
    /// the fd must be deregistered before it is closed; the fd-watch close
    /// routine guarantees that.
    pub(crate) fn register(
        &self,
        fd: RawFd,
        key: usize,
        readable: bool,
        writable: bool,
    ) -> io::Result<()> {
        unsafe { self.shared.poller.add(fd, Event::new(key, readable, writable)) }
    }

    /// Re-arm oneshot interest after a delivery, or change interest.
    pub(crate) fn rearm(
        &self,
        fd: RawFd,
        key: usize,
        readable: bool,
        writable: bool,
    ) -> io::Result<()> {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        self.shared
            .poller
            .modify(&borrowed, Event::new(key, readable, writable))
    }

    pub(crate) fn deregister(&self, fd: RawFd) {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        // Ignore errors; the fd may already be closed by the caller.
        let _ = self.shared.poller.delete(&borrowed);
    }

    pub(crate) fn pop_woken(&self) -> Option<Weak<WakeupGate>> {
        self.shared.woken.pop().ok()
    }

    pub(crate) fn pop_completion(&self) -> Option<Completion> {
        self.shared.completions.pop().ok()
    }
}
