//! ebb-loop: a single-threaded reactor.
//!
//! One [`Reactor`] multiplexes heterogeneous event sources into one
//! dispatch cycle: timers, idle/prepare/check phase hooks, cross-thread
//! wakeups, fd readiness watchers, and off-thread name resolution. Handles
//! register through the kind-specific init calls and deliver events
//! through caller-supplied callbacks; [`Reactor::run`] cycles until
//! nothing is left to do.
//!
//! # Quick start
//!
//! ```no_run
//! use std::time::Duration;
//! use ebb_loop::Reactor;
//!
//! let mut reactor = Reactor::new().unwrap();
//! let timer = reactor.timer_init();
//! reactor.timer_start(timer, Duration::from_millis(50), None, |reactor, id| {
//!     println!("fired at {:?}", reactor.now());
//!     reactor.close(id);
//! });
//! reactor.run().unwrap();
//! ```
//!
//! The loop is single-threaded-cooperative: exactly one thread drives it,
//! and `Reactor` is `!Send` to keep it that way. Other threads reach it
//! only through a [`WakeupSender`].

mod backend;
mod fd_watch;
mod handle;
mod hook;
mod reactor;
mod resolve;
mod timer;
mod trace;
mod wakeup;

#[cfg(unix)]
pub mod net;

pub use fd_watch::{Interest, Readiness};
pub use handle::HandleId;
pub use reactor::Reactor;
pub use resolve::{RequestId, ResolveError};
pub use wakeup::WakeupSender;
