mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::{Log, entries, new_log, record};
use evloop_scheduler::{CallbackResult, EventLoop, Scheduler, TimerId};

#[test]
fn test_equal_delays_fire_in_registration_order() {
    common::init_tracing();
    let event_loop = EventLoop::new();
    let log = new_log();

    event_loop.set_timeout(5, record(&log, "a"));
    event_loop.set_timeout(30, record(&log, "late"));
    event_loop.set_timeout(5, record(&log, "b"));
    event_loop.set_timeout(1, record(&log, "early"));
    event_loop.set_timeout(5, record(&log, "c"));

    let report = event_loop.run().unwrap();

    assert_eq!(entries(&log), vec!["early", "a", "b", "c", "late"]);
    assert_eq!(report.final_time, 30);
    assert_eq!(event_loop.stats().time_advances, 3);
}

#[test]
fn test_negative_delay_clamps_to_zero() {
    let event_loop = EventLoop::new();
    let log = new_log();

    event_loop.set_timeout(0, record(&log, "zero"));
    event_loop.set_timeout(-10, record(&log, "negative"));

    let report = event_loop.run().unwrap();

    assert_eq!(entries(&log), vec!["zero", "negative"]);
    assert_eq!(report.final_time, 0);
}

#[test]
fn test_timers_scheduled_while_running_use_current_time() {
    let event_loop = EventLoop::new();
    let log = new_log();
    let times = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        let times = times.clone();
        event_loop.set_timeout(5, move |event_loop| {
            log.borrow_mut().push("A");
            times.borrow_mut().push(event_loop.now());
            event_loop.set_timeout(0, record(&log, "A+0"));
            event_loop.set_timeout(10, record(&log, "A+10"));
        });
    }
    event_loop.set_timeout(5, record(&log, "B"));

    let report = event_loop.run().unwrap();

    assert_eq!(entries(&log), vec!["A", "B", "A+0", "A+10"]);
    assert_eq!(*times.borrow(), vec![5]);
    assert_eq!(report.final_time, 15);
}

#[test]
fn test_cancel_before_deadline() {
    let event_loop = EventLoop::new();
    let log = new_log();

    let doomed = event_loop.set_timeout(10, record(&log, "doomed"));
    event_loop.set_timeout(20, record(&log, "kept"));

    assert!(event_loop.is_timer_pending(doomed));
    assert!(event_loop.cancel_timer(doomed));
    assert!(!event_loop.cancel_timer(doomed));
    assert!(!event_loop.is_timer_pending(doomed));

    event_loop.run().unwrap();

    assert_eq!(entries(&log), vec!["kept"]);
    assert!(!event_loop.cancel_timer(doomed));
}

#[test]
fn test_cancel_after_fire_returns_false() {
    let event_loop = EventLoop::new();
    let log = new_log();

    let fired = event_loop.set_timeout(1, record(&log, "fired"));
    event_loop.run().unwrap();

    assert_eq!(entries(&log), vec!["fired"]);
    assert!(!event_loop.cancel_timer(fired));
}

#[test]
fn test_cancel_due_timer_from_earlier_timer() {
    // Both timers are due at the same moment; the first cancels the second
    // before it gets to run.
    let event_loop = EventLoop::new();
    let log = new_log();
    let victim: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));
    let cancelled = Rc::new(Cell::new(false));

    {
        let log = log.clone();
        let victim = victim.clone();
        let cancelled = cancelled.clone();
        event_loop.set_timeout(5, move |event_loop| {
            log.borrow_mut().push("first");
            if let Some(id) = victim.get() {
                cancelled.set(event_loop.cancel_timer(id));
            }
        });
    }
    victim.set(Some(event_loop.set_timeout(5, record(&log, "second"))));
    event_loop.set_timeout(5, record(&log, "third"));

    event_loop.run().unwrap();

    assert!(cancelled.get());
    assert_eq!(entries(&log), vec!["first", "third"]);
}

#[test]
fn test_cancel_from_microtask() {
    let event_loop = EventLoop::new();
    let log = new_log();

    let timer = event_loop.set_timeout(0, record(&log, "timer"));
    event_loop.queue_microtask(move |event_loop| {
        assert!(event_loop.cancel_timer(timer));
    });

    let report = event_loop.run().unwrap();

    assert!(entries(&log).is_empty());
    assert_eq!(report.macrotasks_run, 0);
}

#[test]
fn test_zero_period_interval_is_clamped() {
    let event_loop = EventLoop::new();
    let times = Rc::new(RefCell::new(Vec::new()));
    let handle: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));

    let seen = times.clone();
    let own = handle.clone();
    let id = event_loop.set_interval(0, move |event_loop| {
        seen.borrow_mut().push(event_loop.now());
        if seen.borrow().len() == 3 {
            if let Some(id) = own.get() {
                event_loop.cancel_timer(id);
            }
        }
    });
    handle.set(Some(id));

    event_loop.run().unwrap();

    assert_eq!(*times.borrow(), vec![1, 2, 3]);
}

fn schedule_through_trait<S: Scheduler>(scheduler: &S, log: &Log) {
    let macro_log = log.clone();
    scheduler.schedule_macrotask(
        Box::new(move |_: &EventLoop| -> CallbackResult {
            macro_log.borrow_mut().push("macro");
            Ok(())
        }),
        3,
    );
    let micro_log = log.clone();
    scheduler.schedule_microtask(Box::new(move |_: &EventLoop| -> CallbackResult {
        micro_log.borrow_mut().push("micro");
        Ok(())
    }));
}

#[test]
fn test_scheduler_trait_surface() {
    let event_loop = EventLoop::new();
    let log = new_log();
    let failures = Rc::new(Cell::new(0));

    let counter = failures.clone();
    Scheduler::on_unhandled_error(
        &event_loop,
        Box::new(move |_| counter.set(counter.get() + 1)),
    );
    schedule_through_trait(&event_loop, &log);

    let report = Scheduler::run(&event_loop).unwrap();

    assert_eq!(entries(&log), vec!["micro", "macro"]);
    assert_eq!(Scheduler::now(&event_loop), 3);
    assert_eq!(report.failures, 0);
    assert_eq!(failures.get(), 0);
}
