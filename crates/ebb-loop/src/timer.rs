//! Timer handles.
//!
//! Armed timers sit in the loop's ordered table keyed by `(deadline, id)`;
//! the earliest entry bounds how long a blocking poll may sleep. A due
//! timer is detected in the poll step against the cached clock and queued
//! onto the pending list; its callback runs in the next cycle's drain.

use std::time::{Duration, Instant};

use crate::handle::{CbSlot, Dispatch, Driver, Fire, Flags, HandleCb, HandleId, HandleRecord};
use crate::reactor::{Inner, Reactor};

pub(crate) struct TimerDriver {
    cb: Option<HandleCb>,
    deadline: Option<Instant>,
    repeat: Option<Duration>,
    /// Set when the deadline passed; cleared when the delivery is taken.
    fired: bool,
}

impl TimerDriver {
    fn new() -> Self {
        TimerDriver {
            cb: None,
            deadline: None,
            repeat: None,
            fired: false,
        }
    }

    fn disarm(&mut self, inner: &mut Inner, flags: &mut Flags, id: HandleId) {
        if let Some(deadline) = self.deadline.take() {
            inner.timers.remove(&(deadline, id));
        }
        self.fired = false;
        inner.deactivate(flags);
    }
}

impl Dispatch for TimerDriver {
    fn begin_pending(&mut self) -> Option<Fire> {
        // A stop between fire and drain cancels the delivery.
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

    fn on_close(&mut self, inner: &mut Inner, flags: &mut Flags, id: HandleId) {
        self.disarm(inner, flags, id);
    }

    fn on_finalize(&mut self, _inner: &mut Inner, _id: HandleId) {
        // In-memory only; nothing to release.
    }
}

impl Reactor {
    /// Register a timer handle. It does nothing until started.
    pub fn timer_init(&mut self) -> HandleId {
        HandleId(
            self.handles
                .insert(HandleRecord::new(Driver::Timer(TimerDriver::new()))),
        )
    }

    /// Arm a timer `delay` from the cached clock. With `repeat`, the timer
    /// re-arms itself at each fire until stopped. Starting an armed timer
    /// restarts it; the new callback replaces the old one.
    pub fn timer_start<F>(
        &mut self,
        id: HandleId,
        delay: Duration,
        repeat: Option<Duration>,
        cb: F,
    ) where
        F: FnMut(&mut Reactor, HandleId) + 'static,
    {
        let rec = self
            .handles
            .get_mut(id.0)
            .expect("timer_start: unknown handle");
        assert!(
            !rec.flags.intersects(Flags::CLOSING | Flags::CLOSED),
            "timer_start on a closing handle"
        );
        let Driver::Timer(timer) = &mut rec.driver else {
            panic!("handle is not a timer");
        };
        if let Some(old) = timer.deadline.take() {
            self.inner.timers.remove(&(old, id));
        }
        let deadline = self.inner.now + delay;
        timer.deadline = Some(deadline);
        timer.repeat = repeat;
        timer.fired = false;
        timer.cb = Some(Box::new(cb));
        self.inner.timers.insert((deadline, id));
        self.inner.activate(&mut rec.flags);
    }

    /// Disarm a timer. A fire that has not been delivered yet is dropped.
    pub fn timer_stop(&mut self, id: HandleId) {
        let rec = self
            .handles
            .get_mut(id.0)
            .expect("timer_stop: unknown handle");
        let Driver::Timer(timer) = &mut rec.driver else {
            panic!("handle is not a timer");
        };
        timer.disarm(&mut self.inner, &mut rec.flags, id);
    }

    /// Queue every timer whose deadline passed. One-shot timers go
    /// inactive at fire time; repeating timers re-arm from the cached
    /// clock.
    pub(crate) fn fire_timers(&mut self) {
        loop {
            let Some(&(deadline, id)) = self.inner.timers.iter().next() else {
                break;
            };
            if deadline > self.inner.now {
                break;
            }
            self.inner.timers.remove(&(deadline, id));

            let Some(rec) = self.handles.get_mut(id.0) else {
                continue;
            };
            let Driver::Timer(timer) = &mut rec.driver else {
                continue;
            };
            timer.fired = true;
            match timer.repeat {
                Some(repeat) => {
                    let next = self.inner.now + repeat;
                    timer.deadline = Some(next);
                    self.inner.timers.insert((next, id));
                }
                None => {
                    timer.deadline = None;
                    self.inner.deactivate(&mut rec.flags);
                }
            }
            self.inner.enqueue(&mut rec.flags, id);
        }
    }
}
