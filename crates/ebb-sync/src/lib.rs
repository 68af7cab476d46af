//! ebb-sync: cross-thread single-assignment promise.
//!
//! A [`Promise`] moves one value (or one error code) from a producer thread
//! to any number of consumer threads, exactly once. Consumers block in
//! [`Promise::wait`] or poll with [`Promise::try_wait`]; the producer settles
//! the promise with [`Promise::fulfil`] or [`Promise::break_with`], or
//! abandons it with [`Promise::cancel`].
//!
//! This crate is loop-agnostic: it knows nothing about the reactor in
//! `ebb-loop`. The common pairing (a loop-driven timer callback fulfilling a
//! promise another thread waits on) needs no coupling beyond `Arc`.

mod promise;

pub use promise::{AlreadySettled, Outcome, Promise};
