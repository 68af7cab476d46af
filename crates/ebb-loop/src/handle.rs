//! Handle records: flags, callbacks, and the per-kind dispatch capability.
//!
//! Handles live in the reactor's arena; a [`HandleId`] is the stable arena
//! key. The reactor core never inspects what kind a handle is to deliver an
//! event or tear it down; it calls through the [`Dispatch`] capability that
//! every kind supplies.

use crate::fd_watch::{FdWatchDriver, Readiness};
use crate::hook::HookDriver;
use crate::reactor::{Inner, Reactor};
use crate::timer::TimerDriver;
use crate::wakeup::WakeupDriver;

/// Stable identifier of a handle registered with a [`Reactor`].
///
/// A handle id is valid from the init call that produced it until the
/// handle's close callback has run; after that the slot may be reused.
/// Using a stale id is a caller error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(pub(crate) usize);

/// Handle state bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Flags(u32);

impl Flags {
    /// Counts toward the loop's "has work" determination while active.
    pub(crate) const REFERENCED: Flags = Flags(1 << 0);
    /// Started and able to receive events.
    pub(crate) const ACTIVE: Flags = Flags(1 << 1);
    /// Close requested; teardown in progress.
    pub(crate) const CLOSING: Flags = Flags(1 << 2);
    /// Teardown finished. Terminal.
    pub(crate) const CLOSED: Flags = Flags(1 << 3);
    /// Currently queued for the next pending-drain.
    pub(crate) const PENDING: Flags = Flags(1 << 4);

    pub(crate) fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn intersects(self, other: Flags) -> bool {
        self.0 & other.0 != 0
    }

    pub(crate) fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub(crate) fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// Callback for timer, hook, and wakeup deliveries.
pub(crate) type HandleCb = Box<dyn FnMut(&mut Reactor, HandleId)>;
/// Callback for fd readiness deliveries.
pub(crate) type IoCb = Box<dyn FnMut(&mut Reactor, HandleId, Readiness)>;
/// Callback fired exactly once when close finalization completes.
pub(crate) type CloseCb = Box<dyn FnOnce(&mut Reactor, HandleId)>;

/// A pending delivery extracted from a driver: the user callback plus any
/// event payload. The callback is taken out of the driver while it runs so
/// it can receive `&mut Reactor` without aliasing the arena.
pub(crate) enum Fire {
    Plain(HandleCb),
    Io(IoCb, Readiness),
}

/// A callback handed back to its driver after a delivery returns.
pub(crate) enum CbSlot {
    Plain(HandleCb),
    Io(IoCb),
}

/// The dispatch capability every handle kind supplies.
///
/// `begin_pending` runs with the record borrowed and must not touch the
/// reactor; `on_close` and `on_finalize` get the loop state (minus the
/// arena) plus the handle's own flags.
pub(crate) trait Dispatch {
    /// Extract the delivery for this handle's pending event, if the event
    /// is still live. Returning `None` drops the delivery.
    fn begin_pending(&mut self) -> Option<Fire>;

    /// Return a callback taken by `begin_pending` (or a phase run). Drivers
    /// keep a newer callback if one was installed while the old one ran.
    fn restore_cb(&mut self, cb: CbSlot);

    /// Kind-specific shutdown, run when close is requested: stop the
    /// handle and release anything the finalizer will assert about.
    fn on_close(&mut self, inner: &mut Inner, flags: &mut Flags, id: HandleId);

    /// Kind-specific release checks, run by the close finalizer after
    /// `CLOSED` is set and before the close callback fires.
    fn on_finalize(&mut self, inner: &mut Inner, id: HandleId);
}

/// The closed set of handle kinds.
pub(crate) enum Driver {
    Timer(TimerDriver),
    Hook(HookDriver),
    Wakeup(WakeupDriver),
    FdWatch(FdWatchDriver),
}

impl Driver {
    /// Project the kind's dispatch capability.
    pub(crate) fn ops(&mut self) -> &mut dyn Dispatch {
        match self {
            Driver::Timer(d) => d,
            Driver::Hook(d) => d,
            Driver::Wakeup(d) => d,
            Driver::FdWatch(d) => d,
        }
    }
}

/// One arena slot: flags, the kind driver, and the optional close callback.
pub(crate) struct HandleRecord {
    pub(crate) flags: Flags,
    pub(crate) driver: Driver,
    pub(crate) close_cb: Option<CloseCb>,
}

impl HandleRecord {
    pub(crate) fn new(driver: Driver) -> Self {
        HandleRecord {
            flags: Flags::REFERENCED,
            driver,
            close_cb: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_insert_remove_contains() {
        let mut flags = Flags::REFERENCED;
        assert!(flags.contains(Flags::REFERENCED));
        assert!(!flags.contains(Flags::ACTIVE));

        flags.insert(Flags::ACTIVE);
        assert!(flags.contains(Flags::REFERENCED | Flags::ACTIVE));

        flags.remove(Flags::ACTIVE);
        assert!(!flags.contains(Flags::ACTIVE));
        assert!(flags.contains(Flags::REFERENCED));
    }

    #[test]
    fn flags_intersects_any_bit() {
        let flags = Flags::CLOSING;
        assert!(flags.intersects(Flags::CLOSING | Flags::CLOSED));
        assert!(!flags.intersects(Flags::CLOSED | Flags::PENDING));
    }
}
