#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use evloop_scheduler::EventLoop;

pub type Log = Rc<RefCell<Vec<&'static str>>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

pub fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

/// A callback that appends `entry` to `log`.
pub fn record(log: &Log, entry: &'static str) -> impl FnOnce(&EventLoop) + 'static {
    let log = Rc::clone(log);
    move |_: &EventLoop| log.borrow_mut().push(entry)
}

pub fn entries(log: &Log) -> Vec<&'static str> {
    log.borrow().clone()
}
