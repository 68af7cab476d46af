//! The reactor: handle arena, pending queue, and the phased run cycle.
//!
//! One `Reactor` owns every handle and in-flight request for one logical run
//! context and is driven by exactly one thread. A cycle runs the phases in
//! strict order:
//!
//! 1. idle hooks (unconditional)
//! 2. pending drain: deliver queued events, finalize closing handles
//! 3. work gate: stop here unless something is active
//! 4. prepare hooks
//! 5. backend poll (blocking only when nothing idles and something is active)
//! 6. check hooks
//!
//! Handles enqueued during the pending drain land in the *next* cycle's
//! drain; the queue is detached whole before dispatch so a callback can
//! never starve the loop by re-enqueueing in the same pass.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io;
use std::mem;
use std::time::{Duration, Instant};

use slab::Slab;

use crate::backend::Backend;
use crate::handle::{CbSlot, CloseCb, Driver, Fire, Flags, HandleId, HandleRecord};
use crate::hook::Phase;
use crate::resolve::{RequestId, RequestRecord, ResolveOutcome};
use crate::trace::{debug, trace};

/// Loop state minus the handle arena. Split out so kind drivers can borrow
/// it mutably while their own record is borrowed from the arena.
pub(crate) struct Inner {
    pub(crate) backend: Backend,
    pub(crate) pending: VecDeque<HandleId>,
    pub(crate) ready_requests: VecDeque<(RequestId, ResolveOutcome)>,
    pub(crate) requests: HashMap<u64, RequestRecord>,
    pub(crate) next_request: u64,
    /// Armed timers ordered by `(deadline, id)`; the head bounds the
    /// blocking poll timeout.
    pub(crate) timers: BTreeSet<(Instant, HandleId)>,
    pub(crate) idle: Vec<HandleId>,
    pub(crate) prepare: Vec<HandleId>,
    pub(crate) check: Vec<HandleId>,
    /// Handles that are both active and referenced.
    pub(crate) active_handles: usize,
    /// Cached monotonic clock; refreshed by `update_time`, never read
    /// directly from the OS inside a cycle.
    pub(crate) now: Instant,
}

impl Inner {
    /// Queue a handle for the next pending drain. Idempotent while the
    /// handle is already queued; illegal once it is closed.
    pub(crate) fn enqueue(&mut self, flags: &mut Flags, id: HandleId) {
        assert!(
            !flags.contains(Flags::CLOSED),
            "pending enqueue of a closed handle"
        );
        if flags.contains(Flags::PENDING) {
            return;
        }
        flags.insert(Flags::PENDING);
        self.pending.push_back(id);
    }

    pub(crate) fn activate(&mut self, flags: &mut Flags) {
        if flags.contains(Flags::ACTIVE) {
            return;
        }
        flags.insert(Flags::ACTIVE);
        if flags.contains(Flags::REFERENCED) {
            self.active_handles += 1;
        }
    }

    pub(crate) fn deactivate(&mut self, flags: &mut Flags) {
        if !flags.contains(Flags::ACTIVE) {
            return;
        }
        flags.remove(Flags::ACTIVE);
        if flags.contains(Flags::REFERENCED) {
            self.active_handles -= 1;
        }
    }

    pub(crate) fn phase_list(&mut self, phase: Phase) -> &mut Vec<HandleId> {
        match phase {
            Phase::Idle => &mut self.idle,
            Phase::Prepare => &mut self.prepare,
            Phase::Check => &mut self.check,
        }
    }
}

/// A single-threaded event loop.
///
/// `Reactor` is deliberately `!Send`: one thread constructs it and drives
/// it. Cross-thread interaction goes through [`WakeupSender`] handles and
/// the promise primitive in `ebb-sync`, never through the loop itself.
///
/// [`WakeupSender`]: crate::WakeupSender
pub struct Reactor {
    pub(crate) inner: Inner,
    pub(crate) handles: Slab<HandleRecord>,
}

thread_local! {
    static DEFAULT: RefCell<Option<Reactor>> = const { RefCell::new(None) };
}

impl Reactor {
    /// Construct a loop with its own backend poller.
    pub fn new() -> io::Result<Reactor> {
        Ok(Reactor {
            inner: Inner {
                backend: Backend::new()?,
                pending: VecDeque::new(),
                ready_requests: VecDeque::new(),
                requests: HashMap::new(),
                next_request: 1,
                timers: BTreeSet::new(),
                idle: Vec::new(),
                prepare: Vec::new(),
                check: Vec::new(),
                active_handles: 0,
                now: Instant::now(),
            },
            handles: Slab::new(),
        })
    }

    /// Run `f` against this thread's default loop, constructing it on first
    /// use. The loop is single-threaded-cooperative, so the "process-wide"
    /// default is per thread; tests that want isolation should construct
    /// their own loop with [`Reactor::new`] instead. Nesting `with_default`
    /// calls is a caller error.
    pub fn with_default<R>(f: impl FnOnce(&mut Reactor) -> R) -> io::Result<R> {
        DEFAULT.with(|slot| {
            let mut slot = slot.borrow_mut();
            let reactor = match slot.as_mut() {
                Some(reactor) => reactor,
                None => slot.insert(Reactor::new()?),
            };
            Ok(f(reactor))
        })
    }

    /// Drive cycles until no active handles, no active requests, and no
    /// pending dispatches remain. Re-entrant across repeated calls.
    pub fn run(&mut self) -> io::Result<()> {
        debug!("reactor run");
        while self.cycle()? {}
        debug!("reactor stopped: no remaining work");
        Ok(())
    }

    /// Execute exactly one cycle regardless of remaining work. Returns
    /// whether more work may exist.
    pub fn run_once(&mut self) -> io::Result<bool> {
        self.cycle()
    }

    /// Refresh the cached monotonic clock.
    pub fn update_time(&mut self) {
        self.inner.now = Instant::now();
    }

    /// Read the cached monotonic clock.
    pub fn now(&self) -> Instant {
        self.inner.now
    }

    /// Whether the handle currently counts toward the loop's "has work"
    /// determination.
    pub fn is_active(&self, id: HandleId) -> bool {
        let rec = self.handles.get(id.0).expect("is_active: unknown handle");
        rec.flags.contains(Flags::ACTIVE | Flags::REFERENCED)
    }

    /// Whether close has been requested (or completed) for the handle.
    pub fn is_closing(&self, id: HandleId) -> bool {
        let rec = self.handles.get(id.0).expect("is_closing: unknown handle");
        rec.flags.intersects(Flags::CLOSING | Flags::CLOSED)
    }

    /// Request close with no completion callback. See [`close_with`].
    ///
    /// [`close_with`]: Reactor::close_with
    pub fn close(&mut self, id: HandleId) {
        self.close_impl(id, None);
    }

    /// Request close. The kind's shutdown routine runs now; finalization is
    /// deferred to a later cycle's pending drain, after which `cb` fires
    /// exactly once and the id becomes invalid.
    ///
    /// Closing a handle that is already closing or closed is a caller
    /// error and panics.
    pub fn close_with<F>(&mut self, id: HandleId, cb: F)
    where
        F: FnOnce(&mut Reactor, HandleId) + 'static,
    {
        self.close_impl(id, Some(Box::new(cb)));
    }

    fn close_impl(&mut self, id: HandleId, cb: Option<CloseCb>) {
        debug!(handle = id.0, "close requested");
        let rec = self.handles.get_mut(id.0).expect("close: unknown handle");
        assert!(
            !rec.flags.intersects(Flags::CLOSING | Flags::CLOSED),
            "close called on an already-closing handle"
        );
        rec.close_cb = cb;
        rec.driver.ops().on_close(&mut self.inner, &mut rec.flags, id);
        rec.flags.insert(Flags::CLOSING);
        // Unconditional: teardown must drain even if no event is queued.
        self.inner.enqueue(&mut rec.flags, id);
    }

    // ── Cycle ───────────────────────────────────────────────────────

    fn cycle(&mut self) -> io::Result<bool> {
        self.run_hooks(Phase::Idle);
        self.run_pending();

        if self.inner.active_handles > 0 || !self.inner.requests.is_empty() {
            self.run_hooks(Phase::Prepare);
            self.poll_backend()?;
            self.run_hooks(Phase::Check);
        }

        Ok(self.has_work())
    }

    fn has_work(&self) -> bool {
        !self.inner.pending.is_empty()
            || !self.inner.ready_requests.is_empty()
            || self.inner.active_handles > 0
            || !self.inner.requests.is_empty()
    }

    /// Detach and drain the entire pending queue: finalize closing handles,
    /// deliver events for the rest, then dispatch resolver completions.
    fn run_pending(&mut self) {
        let batch = mem::take(&mut self.inner.pending);
        let completions = mem::take(&mut self.inner.ready_requests);

        for id in batch {
            let fire = {
                let Some(rec) = self.handles.get_mut(id.0) else {
                    continue;
                };
                rec.flags.remove(Flags::PENDING);
                if rec.flags.contains(Flags::CLOSING) {
                    self.finish_close(id);
                    continue;
                }
                rec.driver.ops().begin_pending()
            };
            match fire {
                Some(Fire::Plain(mut cb)) => {
                    cb(self, id);
                    self.restore(id, CbSlot::Plain(cb));
                }
                Some(Fire::Io(mut cb, ready)) => {
                    cb(self, id, ready);
                    self.restore(id, CbSlot::Io(cb));
                    self.fd_rearm(id);
                }
                None => {}
            }
        }

        for (req, outcome) in completions {
            self.finish_request(req, outcome);
        }
    }

    /// Hand a callback back to its driver after a delivery returns. The
    /// record may be gone (closed and finalized from inside the callback)
    /// or carry a newer callback; both drop the old one.
    pub(crate) fn restore(&mut self, id: HandleId, cb: CbSlot) {
        if let Some(rec) = self.handles.get_mut(id.0) {
            rec.driver.ops().restore_cb(cb);
        }
    }

    /// Terminal step of the handle state machine. Runs in the pending
    /// drain once close was requested; the close callback is the single
    /// signal that the id is done.
    fn finish_close(&mut self, id: HandleId) {
        let close_cb = {
            let rec = self
                .handles
                .get_mut(id.0)
                .expect("close finalize: unknown handle");
            assert!(
                !rec.flags.contains(Flags::ACTIVE),
                "handle still active at close finalize"
            );
            assert!(
                rec.flags.contains(Flags::CLOSING),
                "close finalize without close request"
            );
            assert!(
                !rec.flags.contains(Flags::CLOSED),
                "handle finalized twice"
            );
            rec.flags.insert(Flags::CLOSED);
            rec.driver.ops().on_finalize(&mut self.inner, id);
            rec.close_cb.take()
        };
        if let Some(cb) = close_cb {
            cb(self, id);
        }
        self.handles.remove(id.0);
    }

    // ── Poll ────────────────────────────────────────────────────────

    /// Block only when nothing wants to run every idle tick and at least
    /// one active handle exists; otherwise sweep without waiting.
    fn should_block(&self) -> bool {
        self.inner.idle.is_empty() && self.inner.active_handles > 0
    }

    fn poll_backend(&mut self) -> io::Result<()> {
        let block = self.should_block();
        trace!(block, "backend poll");
        self.update_time();
        let timeout = if block {
            self.next_timeout()
        } else {
            Some(Duration::ZERO)
        };

        {
            let _busy = self.inner.backend.hold();
            self.inner.backend.wait(timeout)?;
        }

        self.update_time();
        self.fire_timers();
        self.drain_wakeups();
        self.drain_completions();
        self.deliver_io();
        Ok(())
    }

    /// Earliest timer deadline relative to the cached clock, or `None` to
    /// block until an event or a notify.
    fn next_timeout(&self) -> Option<Duration> {
        self.inner
            .timers
            .iter()
            .next()
            .map(|&(deadline, _)| deadline.saturating_duration_since(self.inner.now))
    }
}
