//! A loop-driven timer callback as the promise producer, with the
//! consumer blocked on another thread.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ebb_loop::Reactor;
use ebb_sync::{Outcome, Promise};

fn fulfil_on_timer(promise: Arc<Promise<&'static str>>) {
    let mut reactor = Reactor::new().unwrap();
    let timer = reactor.timer_init();
    reactor.timer_start(timer, Duration::ZERO, None, move |_, _| {
        let _ = promise.fulfil("ok");
    });
    reactor.run().unwrap();
}

fn break_on_timer(promise: Arc<Promise<&'static str>>) {
    let mut reactor = Reactor::new().unwrap();
    let timer = reactor.timer_init();
    reactor.timer_start(timer, Duration::ZERO, None, move |_, _| {
        let _ = promise.break_with(-5);
    });
    reactor.run().unwrap();
}

#[test]
fn promise_can_be_fulfilled() {
    let promise = Arc::new(Promise::new());
    let producer = {
        let promise = promise.clone();
        thread::spawn(move || fulfil_on_timer(promise))
    };

    assert_eq!(promise.wait(), Outcome::Fulfilled("ok"));
    producer.join().unwrap();
}

#[test]
fn promise_can_be_broken() {
    let promise = Arc::new(Promise::new());
    let producer = {
        let promise = promise.clone();
        thread::spawn(move || break_on_timer(promise))
    };

    assert_eq!(promise.wait(), Outcome::Broken(-5));
    producer.join().unwrap();
}

#[test]
fn abandoned_promise_cancels_the_waiter() {
    let promise: Arc<Promise<&'static str>> = Arc::new(Promise::new());
    let producer = {
        let promise = promise.clone();
        thread::spawn(move || {
            // The loop runs a timer that never settles the promise; the
            // producer gives up and cancels instead.
            let mut reactor = Reactor::new().unwrap();
            let timer = reactor.timer_init();
            reactor.timer_start(timer, Duration::from_millis(20), None, move |_, _| {
                promise.cancel();
            });
            reactor.run().unwrap();
        })
    };

    assert_eq!(promise.wait(), Outcome::Cancelled);
    producer.join().unwrap();
}
