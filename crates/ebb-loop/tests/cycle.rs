//! Loop lifecycle: run/run_once, timers, phase hooks, and the close state
//! machine.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use ebb_loop::Reactor;

#[test]
fn run_with_zero_handles_returns_immediately() {
    let mut reactor = Reactor::new().unwrap();
    let start = Instant::now();
    reactor.run().unwrap();
    assert!(start.elapsed() < Duration::from_millis(50));
    assert!(!reactor.run_once().unwrap());
}

#[test]
fn timer_fires_once_and_loop_drains() {
    let mut reactor = Reactor::new().unwrap();
    let count = Rc::new(Cell::new(0u32));
    let count_cb = count.clone();

    let timer = reactor.timer_init();
    assert!(!reactor.is_active(timer));
    // Deadlines count from the cached clock; refresh it first.
    reactor.update_time();
    reactor.timer_start(timer, Duration::from_millis(10), None, move |_, _| {
        count_cb.set(count_cb.get() + 1);
    });
    assert!(reactor.is_active(timer));

    let start = Instant::now();
    reactor.run().unwrap();
    assert_eq!(count.get(), 1);
    assert!(start.elapsed() >= Duration::from_millis(10));
    assert!(!reactor.is_active(timer));
}

#[test]
fn timer_restart_replaces_deadline() {
    let mut reactor = Reactor::new().unwrap();
    let count = Rc::new(Cell::new(0u32));
    let count_cb = count.clone();

    let timer = reactor.timer_init();
    reactor.timer_start(timer, Duration::from_millis(500), None, |_, _| {
        panic!("replaced callback must not run");
    });
    reactor.timer_start(timer, Duration::from_millis(10), None, move |_, _| {
        count_cb.set(count_cb.get() + 1);
    });

    let start = Instant::now();
    reactor.run().unwrap();
    assert_eq!(count.get(), 1);
    assert!(start.elapsed() < Duration::from_millis(400));
}

#[test]
fn repeating_timer_runs_until_stopped() {
    let mut reactor = Reactor::new().unwrap();
    let count = Rc::new(Cell::new(0u32));
    let count_cb = count.clone();

    let timer = reactor.timer_init();
    reactor.timer_start(
        timer,
        Duration::from_millis(1),
        Some(Duration::from_millis(1)),
        move |reactor, id| {
            count_cb.set(count_cb.get() + 1);
            if count_cb.get() == 3 {
                reactor.timer_stop(id);
            }
        },
    );

    reactor.run().unwrap();
    assert_eq!(count.get(), 3);
}

#[test]
fn timers_fire_in_deadline_order() {
    let mut reactor = Reactor::new().unwrap();
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let late = reactor.timer_init();
    let early = reactor.timer_init();
    {
        let order = order.clone();
        reactor.timer_start(late, Duration::from_millis(30), None, move |_, _| {
            order.borrow_mut().push("late");
        });
    }
    {
        let order = order.clone();
        reactor.timer_start(early, Duration::from_millis(5), None, move |_, _| {
            order.borrow_mut().push("early");
        });
    }

    reactor.run().unwrap();
    assert_eq!(*order.borrow(), ["early", "late"]);
}

#[test]
fn pending_enqueue_during_drain_lands_next_cycle() {
    let mut reactor = Reactor::new().unwrap();
    let cb_ran = Rc::new(Cell::new(false));
    let closed = Rc::new(Cell::new(false));

    let timer = reactor.timer_init();
    {
        let cb_ran = cb_ran.clone();
        let closed = closed.clone();
        reactor.timer_start(timer, Duration::ZERO, None, move |reactor, id| {
            cb_ran.set(true);
            let closed = closed.clone();
            // Close from inside the drain: the finalizer must not run in
            // this same pass.
            reactor.close_with(id, move |_, _| closed.set(true));
        });
    }

    // Cycle 1: the poll detects the due timer and queues it.
    assert!(reactor.run_once().unwrap());
    assert!(!cb_ran.get());

    // Cycle 2: the callback runs and requests close; finalize is deferred.
    assert!(reactor.run_once().unwrap());
    assert!(cb_ran.get());
    assert!(!closed.get());

    // Cycle 3: the close finalizer runs.
    assert!(!reactor.run_once().unwrap());
    assert!(closed.get());
}

#[test]
fn close_callback_fires_exactly_once() {
    let mut reactor = Reactor::new().unwrap();
    let closes = Rc::new(Cell::new(0u32));
    let closes_cb = closes.clone();

    // Closing a handle that was never started still finalizes.
    let timer = reactor.timer_init();
    reactor.close_with(timer, move |_, _| closes_cb.set(closes_cb.get() + 1));
    assert!(reactor.is_closing(timer));

    reactor.run().unwrap();
    assert_eq!(closes.get(), 1);
}

#[test]
#[should_panic(expected = "already-closing")]
fn double_close_is_a_caller_error() {
    let mut reactor = Reactor::new().unwrap();
    let timer = reactor.timer_init();
    reactor.close(timer);
    reactor.close(timer);
}

#[test]
fn close_drops_undelivered_timer_fire() {
    let mut reactor = Reactor::new().unwrap();
    let timer = reactor.timer_init();
    reactor.timer_start(timer, Duration::ZERO, None, |_, _| {
        panic!("closed before dispatch; must not run");
    });

    // Cycle 1 queues the fire; closing now must win over the delivery.
    assert!(reactor.run_once().unwrap());
    reactor.close(timer);
    reactor.run().unwrap();
}

#[test]
fn is_closing_tracks_the_close_request() {
    let mut reactor = Reactor::new().unwrap();
    let timer = reactor.timer_init();
    reactor.timer_start(timer, Duration::from_secs(60), None, |_, _| {});
    assert!(reactor.is_active(timer));
    assert!(!reactor.is_closing(timer));

    reactor.close(timer);
    assert!(!reactor.is_active(timer));
    assert!(reactor.is_closing(timer));
    reactor.run().unwrap();
}

#[test]
fn idle_hook_keeps_the_loop_spinning() {
    let mut reactor = Reactor::new().unwrap();
    let cycles = Rc::new(Cell::new(0u32));
    let cycles_cb = cycles.clone();

    let idle = reactor.idle_init();
    reactor.idle_start(idle, move |reactor, id| {
        cycles_cb.set(cycles_cb.get() + 1);
        if cycles_cb.get() == 3 {
            reactor.idle_stop(id);
            reactor.close(id);
        }
    });

    let start = Instant::now();
    reactor.run().unwrap();
    assert_eq!(cycles.get(), 3);
    // Three non-blocking cycles; nothing ever slept in the poller.
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn idle_hook_prevents_poll_blocking() {
    let mut reactor = Reactor::new().unwrap();
    let idle_runs = Rc::new(Cell::new(0u32));
    let idle_runs_cb = idle_runs.clone();

    let idle = reactor.idle_init();
    reactor.idle_start(idle, move |_, _| {
        idle_runs_cb.set(idle_runs_cb.get() + 1);
    });

    let timer = reactor.timer_init();
    let idle_for_close = idle;
    reactor.timer_start(timer, Duration::from_millis(30), None, move |reactor, id| {
        reactor.close(id);
        reactor.idle_stop(idle_for_close);
        reactor.close(idle_for_close);
    });

    reactor.run().unwrap();
    // While the timer waited, every cycle ran the idle hook instead of
    // blocking in the backend.
    assert!(idle_runs.get() > 3, "idle ran {} times", idle_runs.get());
}

#[test]
fn prepare_and_check_bracket_the_poll() {
    let mut reactor = Reactor::new().unwrap();
    let prepares = Rc::new(Cell::new(0u32));
    let checks = Rc::new(Cell::new(0u32));

    let prepare = reactor.prepare_init();
    {
        let prepares = prepares.clone();
        reactor.prepare_start(prepare, move |_, _| prepares.set(prepares.get() + 1));
    }
    let check = reactor.check_init();
    {
        let checks = checks.clone();
        let prepares = prepares.clone();
        reactor.check_start(check, move |_, _| {
            checks.set(checks.get() + 1);
            // Prepare already ran this cycle.
            assert_eq!(prepares.get(), checks.get());
        });
    }

    let timer = reactor.timer_init();
    reactor.timer_start(timer, Duration::from_millis(10), None, move |reactor, id| {
        reactor.close(id);
        reactor.prepare_stop(prepare);
        reactor.close(prepare);
        reactor.check_stop(check);
        reactor.close(check);
    });

    reactor.run().unwrap();
    assert!(prepares.get() >= 1);
    assert!(checks.get() >= 1);
}

#[test]
fn run_once_executes_exactly_one_cycle() {
    let mut reactor = Reactor::new().unwrap();
    let count = Rc::new(Cell::new(0u32));
    let count_cb = count.clone();

    let timer = reactor.timer_init();
    reactor.timer_start(timer, Duration::ZERO, None, move |_, _| {
        count_cb.set(count_cb.get() + 1);
    });

    // First cycle only queues the due timer.
    assert!(reactor.run_once().unwrap());
    assert_eq!(count.get(), 0);
    // Second cycle delivers it.
    reactor.run_once().unwrap();
    assert_eq!(count.get(), 1);
}

#[test]
fn run_is_reentrant_across_calls() {
    let mut reactor = Reactor::new().unwrap();
    for round in 0..3u32 {
        let count = Rc::new(Cell::new(0u32));
        let count_cb = count.clone();
        let timer = reactor.timer_init();
        reactor.timer_start(timer, Duration::from_millis(1), None, move |reactor, id| {
            count_cb.set(count_cb.get() + 1);
            reactor.close(id);
        });
        reactor.run().unwrap();
        assert_eq!(count.get(), 1, "round {round}");
    }
}
