//! Fd readiness watchers.
//!
//! A watcher borrows a file descriptor: the caller owns the fd and must
//! keep it open until the watcher's close callback runs. Backend interest
//! is oneshot; the loop re-arms it after each delivery while the watcher
//! stays started.

use std::io;
use std::os::unix::io::RawFd;

use crate::handle::{CbSlot, Dispatch, Driver, Fire, Flags, HandleId, HandleRecord, IoCb};
use crate::reactor::{Inner, Reactor};

/// Which readiness events a watcher asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Interest = Interest {
        readable: false,
        writable: true,
    };
}

impl std::ops::BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest {
            readable: self.readable || rhs.readable,
            writable: self.writable || rhs.writable,
        }
    }
}

/// Readiness reported to a watcher callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

pub(crate) struct FdWatchDriver {
    pub(crate) fd: RawFd,
    pub(crate) interest: Interest,
    /// Whether the fd is currently added to the backend poller. Must be
    /// false by finalize time; close deregisters.
    pub(crate) registered: bool,
    ready: Readiness,
    cb: Option<IoCb>,
}

impl Dispatch for FdWatchDriver {
    fn begin_pending(&mut self) -> Option<Fire> {
        if !self.ready.readable && !self.ready.writable {
            return None;
        }
        let ready = self.ready;
        self.ready = Readiness::default();
        self.cb.take().map(|cb| Fire::Io(cb, ready))
    }

    fn restore_cb(&mut self, cb: CbSlot) {
        if self.cb.is_none() {
            if let CbSlot::Io(cb) = cb {
                self.cb = Some(cb);
            }
        }
    }

    fn on_close(&mut self, inner: &mut Inner, flags: &mut Flags, _id: HandleId) {
        if self.registered {
            inner.backend.deregister(self.fd);
            self.registered = false;
        }
        self.ready = Readiness::default();
        inner.deactivate(flags);
    }

    fn on_finalize(&mut self, _inner: &mut Inner, _id: HandleId) {
        assert!(
            !self.registered,
            "fd watcher still registered at close finalize"
        );
    }
}

impl Reactor {
    /// Register a watcher for a borrowed fd. No backend interest until
    /// started.
    pub fn fd_init(&mut self, fd: RawFd) -> HandleId {
        HandleId(
            self.handles
                .insert(HandleRecord::new(Driver::FdWatch(FdWatchDriver {
                    fd,
                    interest: Interest::default(),
                    registered: false,
                    ready: Readiness::default(),
                    cb: None,
                }))),
        )
    }

    /// Start (or re-start with new interest) a watcher. The callback runs
    /// in a pending drain with the readiness observed by the poll that
    /// detected it.
    pub fn fd_start<F>(&mut self, id: HandleId, interest: Interest, cb: F) -> io::Result<()>
    where
        F: FnMut(&mut Reactor, HandleId, Readiness) + 'static,
    {
        let rec = self
            .handles
            .get_mut(id.0)
            .expect("fd_start: unknown handle");
        assert!(
            !rec.flags.intersects(Flags::CLOSING | Flags::CLOSED),
            "fd_start on a closing handle"
        );
        let Driver::FdWatch(watch) = &mut rec.driver else {
            panic!("handle is not an fd watcher");
        };
        watch.interest = interest;
        watch.cb = Some(Box::new(cb));
        if watch.registered {
            self.inner
                .backend
                .rearm(watch.fd, id.0, interest.readable, interest.writable)?;
        } else {
            self.inner
                .backend
                .register(watch.fd, id.0, interest.readable, interest.writable)?;
            watch.registered = true;
        }
        self.inner.activate(&mut rec.flags);
        Ok(())
    }

    /// Stop delivering events. The fd stays registered with empty interest
    /// so a later start is a cheap re-arm.
    pub fn fd_stop(&mut self, id: HandleId) -> io::Result<()> {
        let rec = self
            .handles
            .get_mut(id.0)
            .expect("fd_stop: unknown handle");
        let Driver::FdWatch(watch) = &mut rec.driver else {
            panic!("handle is not an fd watcher");
        };
        if watch.registered {
            self.inner.backend.rearm(watch.fd, id.0, false, false)?;
        }
        watch.ready = Readiness::default();
        self.inner.deactivate(&mut rec.flags);
        Ok(())
    }

    /// Record readiness from the last backend wait and queue the watchers.
    pub(crate) fn deliver_io(&mut self) {
        let events = self.inner.backend.take_ready();
        for (key, readable, writable) in events {
            let id = HandleId(key);
            let Some(rec) = self.handles.get_mut(key) else {
                continue;
            };
            if rec.flags.intersects(Flags::CLOSING | Flags::CLOSED) {
                continue;
            }
            let Driver::FdWatch(watch) = &mut rec.driver else {
                continue;
            };
            if readable {
                watch.ready.readable = true;
            }
            if writable {
                watch.ready.writable = true;
            }
            self.inner.enqueue(&mut rec.flags, id);
        }
    }

    /// Re-arm oneshot interest after a delivery. Skipped once the watcher
    /// stopped or began closing inside its own callback; errors surface on
    /// the next start call instead of mid-drain.
    pub(crate) fn fd_rearm(&mut self, id: HandleId) {
        let Some(rec) = self.handles.get_mut(id.0) else {
            return;
        };
        if rec.flags.intersects(Flags::CLOSING | Flags::CLOSED)
            || !rec.flags.contains(Flags::ACTIVE)
        {
            return;
        }
        if let Driver::FdWatch(watch) = &mut rec.driver {
            let _ = self.inner.backend.rearm(
                watch.fd,
                id.0,
                watch.interest.readable,
                watch.interest.writable,
            );
        }
    }
}
