//! Phase hooks: idle, prepare, and check handles.
//!
//! All three share one driver; they differ only in which registry they
//! join and therefore when the loop runs them. Idle hooks run first every
//! cycle and their presence forces the backend poll to a zero timeout, so
//! "something wants to run on every idle tick" never blocks in the OS.

use crate::handle::{CbSlot, Dispatch, Driver, Fire, Flags, HandleCb, HandleId, HandleRecord};
use crate::reactor::{Inner, Reactor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Prepare,
    Check,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Prepare => "prepare",
            Phase::Check => "check",
        }
    }
}

pub(crate) struct HookDriver {
    phase: Phase,
    cb: Option<HandleCb>,
    started: bool,
}

impl HookDriver {
    fn stop(&mut self, inner: &mut Inner, flags: &mut Flags, id: HandleId) {
        if !self.started {
            return;
        }
        self.started = false;
        inner.phase_list(self.phase).retain(|&hook| hook != id);
        inner.deactivate(flags);
    }
}

impl Dispatch for HookDriver {
    fn begin_pending(&mut self) -> Option<Fire> {
        // Hooks run from their phase registry, never from the pending
        // queue (a closing hook takes the finalizer path before this).
        unreachable!("phase hook delivered as a pending event");
    }

    fn restore_cb(&mut self, cb: CbSlot) {
        if self.cb.is_none() {
            if let CbSlot::Plain(cb) = cb {
                self.cb = Some(cb);
            }
        }
    }

    fn on_close(&mut self, inner: &mut Inner, flags: &mut Flags, id: HandleId) {
        self.stop(inner, flags, id);
    }

    fn on_finalize(&mut self, _inner: &mut Inner, _id: HandleId) {}
}

impl Reactor {
    fn hook_init(&mut self, phase: Phase) -> HandleId {
        HandleId(self.handles.insert(HandleRecord::new(Driver::Hook(HookDriver {
            phase,
            cb: None,
            started: false,
        }))))
    }

    fn hook_start(&mut self, id: HandleId, phase: Phase, cb: HandleCb) {
        let rec = self.handles.get_mut(id.0).expect("hook start: unknown handle");
        assert!(
            !rec.flags.intersects(Flags::CLOSING | Flags::CLOSED),
            "hook started while closing"
        );
        let Driver::Hook(hook) = &mut rec.driver else {
            panic!("handle is not a {} handle", phase.label());
        };
        assert!(
            hook.phase == phase,
            "handle is not a {} handle",
            phase.label()
        );
        if !hook.started {
            hook.started = true;
            self.inner.phase_list(phase).push(id);
            self.inner.activate(&mut rec.flags);
        }
        hook.cb = Some(cb);
    }

    fn hook_stop(&mut self, id: HandleId, phase: Phase) {
        let rec = self.handles.get_mut(id.0).expect("hook stop: unknown handle");
        let Driver::Hook(hook) = &mut rec.driver else {
            panic!("handle is not a {} handle", phase.label());
        };
        assert!(
            hook.phase == phase,
            "handle is not a {} handle",
            phase.label()
        );
        hook.stop(&mut self.inner, &mut rec.flags, id);
    }

    /// Register an idle handle: runs at the top of every cycle while
    /// started, and keeps the backend poll from blocking.
    pub fn idle_init(&mut self) -> HandleId {
        self.hook_init(Phase::Idle)
    }

    pub fn idle_start<F>(&mut self, id: HandleId, cb: F)
    where
        F: FnMut(&mut Reactor, HandleId) + 'static,
    {
        self.hook_start(id, Phase::Idle, Box::new(cb));
    }

    pub fn idle_stop(&mut self, id: HandleId) {
        self.hook_stop(id, Phase::Idle);
    }

    /// Register a prepare handle: pre-poll housekeeping inside the work
    /// gate.
    pub fn prepare_init(&mut self) -> HandleId {
        self.hook_init(Phase::Prepare)
    }

    pub fn prepare_start<F>(&mut self, id: HandleId, cb: F)
    where
        F: FnMut(&mut Reactor, HandleId) + 'static,
    {
        self.hook_start(id, Phase::Prepare, Box::new(cb));
    }

    pub fn prepare_stop(&mut self, id: HandleId) {
        self.hook_stop(id, Phase::Prepare);
    }

    /// Register a check handle: post-poll housekeeping, e.g. consuming
    /// completions an fd or wakeup delivery produced.
    pub fn check_init(&mut self) -> HandleId {
        self.hook_init(Phase::Check)
    }

    pub fn check_start<F>(&mut self, id: HandleId, cb: F)
    where
        F: FnMut(&mut Reactor, HandleId) + 'static,
    {
        self.hook_start(id, Phase::Check, Box::new(cb));
    }

    pub fn check_stop(&mut self, id: HandleId) {
        self.hook_stop(id, Phase::Check);
    }

    /// Run one phase's hooks over a snapshot of its registry, so callbacks
    /// may start, stop, or close hooks (including themselves) mid-phase.
    pub(crate) fn run_hooks(&mut self, phase: Phase) {
        let list = match phase {
            Phase::Idle => self.inner.idle.clone(),
            Phase::Prepare => self.inner.prepare.clone(),
            Phase::Check => self.inner.check.clone(),
        };
        for id in list {
            let cb = {
                let Some(rec) = self.handles.get_mut(id.0) else {
                    continue;
                };
                if rec.flags.intersects(Flags::CLOSING | Flags::CLOSED) {
                    continue;
                }
                let Driver::Hook(hook) = &mut rec.driver else {
                    continue;
                };
                if !hook.started {
                    continue;
                }
                match hook.cb.take() {
                    Some(cb) => cb,
                    None => continue,
                }
            };
            let mut cb = cb;
            cb(self, id);
            self.restore(id, CbSlot::Plain(cb));
        }
    }
}
