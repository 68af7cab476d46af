//! Cross-thread wakeup handles.
//!
//! A wakeup handle is the only way another thread injects work into the
//! loop. `wakeup_init` returns a cloneable [`WakeupSender`]; `send` from
//! any thread queues the handle and kicks the backend out of its wait.
//! Sends that land before the delivery runs coalesce into one callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backend::Shared;
use crate::handle::{CbSlot, Dispatch, Driver, Fire, Flags, HandleCb, HandleId, HandleRecord};
use crate::reactor::{Inner, Reactor};

/// Shared between a wakeup driver and its senders. The `queued` gate
/// coalesces sends; arena-slot reuse is detected by pointer identity, so a
/// sender outliving its closed handle can never poke a stranger.
pub(crate) struct WakeupGate {
    pub(crate) key: usize,
    pub(crate) queued: AtomicBool,
}

pub(crate) struct WakeupDriver {
    gate: Arc<WakeupGate>,
    cb: Option<HandleCb>,
    fired: bool,
}

/// Thread-safe sender half of a wakeup handle.
///
/// Cheap to clone; `send` is safe from any thread, including after the
/// handle (or the whole loop) is gone, in which case it is a no-op.
#[derive(Clone)]
pub struct WakeupSender {
    gate: Arc<WakeupGate>,
    shared: Arc<Shared>,
}

impl WakeupSender {
    /// Wake the loop and schedule the handle's callback. Multiple sends
    /// before the delivery runs produce a single callback.
    pub fn send(&self) {
        if !self.gate.queued.swap(true, Ordering::AcqRel) {
            let _ = self.shared.woken.push(Arc::downgrade(&self.gate));
        }
        let _ = self.shared.poller.notify();
    }
}

impl Dispatch for WakeupDriver {
    fn begin_pending(&mut self) -> Option<Fire> {
        if !self.fired {
            return None;
        }
        self.fired = false;
        self.cb.take().map(Fire::Plain)
    }

    fn restore_cb(&mut self, cb: CbSlot) {
        if self.cb.is_none() {
            if let CbSlot::Plain(cb) = cb {
                self.cb = Some(cb);
            }
        }
    }

    fn on_close(&mut self, inner: &mut Inner, flags: &mut Flags, _id: HandleId) {
        // Senders keep their gate alive; the record checks in the drain
        // discard anything they queue from here on.
        inner.deactivate(flags);
    }

    fn on_finalize(&mut self, _inner: &mut Inner, _id: HandleId) {}
}

impl Reactor {
    /// Register a wakeup handle. Active from init: its event source is
    /// another thread, so it holds the loop open until closed.
    pub fn wakeup_init<F>(&mut self, cb: F) -> (HandleId, WakeupSender)
    where
        F: FnMut(&mut Reactor, HandleId) + 'static,
    {
        let entry = self.handles.vacant_entry();
        let key = entry.key();
        let gate = Arc::new(WakeupGate {
            key,
            queued: AtomicBool::new(false),
        });
        let mut record = HandleRecord::new(Driver::Wakeup(WakeupDriver {
            gate: gate.clone(),
            cb: Some(Box::new(cb)),
            fired: false,
        }));
        self.inner.activate(&mut record.flags);
        entry.insert(record);
        let sender = WakeupSender {
            gate,
            shared: self.inner.backend.shared(),
        };
        (HandleId(key), sender)
    }

    /// Queue every handle another thread woke since the last poll.
    pub(crate) fn drain_wakeups(&mut self) {
        while let Some(weak) = self.inner.backend.pop_woken() {
            let Some(gate) = weak.upgrade() else {
                continue;
            };
            gate.queued.store(false, Ordering::Release);
            let id = HandleId(gate.key);
            let Some(rec) = self.handles.get_mut(id.0) else {
                continue;
            };
            if rec.flags.intersects(Flags::CLOSING | Flags::CLOSED) {
                continue;
            }
            let Driver::Wakeup(driver) = &mut rec.driver else {
                continue;
            };
            if !Arc::ptr_eq(&driver.gate, &gate) {
                // The slot was reused after this sender's handle closed.
                continue;
            }
            driver.fired = true;
            self.inner.enqueue(&mut rec.flags, id);
        }
    }
}
