use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};

use crate::cancel::CancelFlag;
use crate::config::{LoopConfig, MicrotaskMode};
use crate::error::{CallbackFailure, LoopError};
use crate::executor::{ErrorHook, Executor};
use crate::queue::TaskQueue;
use crate::remote::{RemoteHandle, RemoteJob};
use crate::task::{
    Callback, CallbackFn, CallbackId, CallbackKind, CallbackResult, Stamped, TaskOutput, TaskSource,
    boxed,
};
use crate::timer::{FiredBody, IntervalFn, TimerBody, TimerId, TimerRegistry};
use crate::trace::{LoopStats, RunReport, TraceEvent};

/// What the loop is doing right now. Exactly one phase at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopPhase {
    #[default]
    Idle,
    RunningSync,
    DrainingMicrotasks,
    RunningMacrotask,
}

/// Entries of the macrotask queue. Timers stay owned by the registry until
/// they are dequeued, so a promoted timer can still be cancelled.
enum Macrotask {
    Ready(Callback),
    Timer(TimerId),
}

impl Stamped for Macrotask {
    fn stamp(&mut self, stamp: u64) {
        if let Self::Ready(callback) = self {
            callback.stamp(stamp);
        }
    }
}

/// Caps the callbacks a single `run` may execute.
struct Budget {
    limit: Option<u64>,
    used: u64,
}

impl Budget {
    fn new(limit: Option<u64>) -> Self {
        Self { limit, used: 0 }
    }

    fn charge(&mut self) -> Result<(), LoopError> {
        if let Some(limit) = self.limit
            && self.used >= limit
        {
            tracing::warn!(limit, "callback limit reached, stopping the loop");
            return Err(LoopError::CallbackLimit { limit });
        }
        self.used += 1;
        Ok(())
    }
}

/// Puts the loop back to `Idle` when a drive ends, including by unwinding.
struct DriveGuard<'a> {
    event_loop: &'a EventLoop,
}

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        self.event_loop.driving.set(false);
        self.event_loop.phase.set(LoopPhase::Idle);
    }
}

/// A deterministic, single-threaded event loop.
///
/// Callbacks receive `&EventLoop` and schedule further work through it. Time
/// is logical: when nothing is runnable the loop jumps straight to the next
/// timer deadline.
pub struct EventLoop {
    config: LoopConfig,
    now: Cell<u64>,
    phase: Cell<LoopPhase>,
    driving: Cell<bool>,
    next_callback: Cell<u64>,
    next_ticks: RefCell<TaskQueue<Callback>>,
    microtasks: RefCell<TaskQueue<Callback>>,
    macrotasks: RefCell<TaskQueue<Macrotask>>,
    timers: RefCell<TimerRegistry>,
    executor: Executor,
    remote_tx: Sender<RemoteJob>,
    remote_rx: Receiver<RemoteJob>,
    stats: Cell<LoopStats>,
    trace: RefCell<Vec<TraceEvent>>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        Self::with_config(LoopConfig::default())
    }

    pub fn with_config(config: LoopConfig) -> Self {
        let (remote_tx, remote_rx) = mpsc::channel();
        Self {
            config,
            now: Cell::new(0),
            phase: Cell::new(LoopPhase::Idle),
            driving: Cell::new(false),
            next_callback: Cell::new(0),
            next_ticks: RefCell::new(TaskQueue::new()),
            microtasks: RefCell::new(TaskQueue::new()),
            macrotasks: RefCell::new(TaskQueue::new()),
            timers: RefCell::new(TimerRegistry::new()),
            executor: Executor::default(),
            remote_tx,
            remote_rx,
            stats: Cell::new(LoopStats::default()),
            trace: RefCell::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Current logical time in milliseconds.
    pub fn now(&self) -> u64 {
        self.now.get()
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase.get()
    }

    pub fn stats(&self) -> LoopStats {
        self.stats.get()
    }

    /// No queued callbacks, no pending timers and no undelivered remote jobs.
    /// Remote jobs that have not arrived in the channel yet are not counted.
    pub fn is_idle(&self) -> bool {
        self.microtasks.borrow().is_empty()
            && self.next_ticks.borrow().is_empty()
            && self.macrotasks.borrow().is_empty()
            && self.timers.borrow().pending() == 0
    }

    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.borrow().len() + self.next_ticks.borrow().len()
    }

    pub fn pending_macrotasks(&self) -> usize {
        self.macrotasks.borrow().len()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().pending()
    }

    /// Whether `id` is still registered: not yet fired and not cancelled.
    pub fn is_timer_pending(&self, id: TimerId) -> bool {
        self.timers.borrow().contains(id)
    }

    /// Drains the recorded trace. Empty unless `LoopConfig::record_trace` is set.
    pub fn take_trace(&self) -> Vec<TraceEvent> {
        std::mem::take(&mut *self.trace.borrow_mut())
    }

    // ---- scheduling -------------------------------------------------------

    pub fn queue_microtask<F, R>(&self, f: F) -> CallbackId
    where
        F: FnOnce(&EventLoop) -> R + 'static,
        R: TaskOutput,
    {
        self.push_microtask(TaskSource::Microtask, CallbackKind::Plain, None, boxed(f))
    }

    pub fn queue_microtask_labelled<F, R>(&self, label: impl Into<Cow<'static, str>>, f: F) -> CallbackId
    where
        F: FnOnce(&EventLoop) -> R + 'static,
        R: TaskOutput,
    {
        self.push_microtask(
            TaskSource::Microtask,
            CallbackKind::Plain,
            Some(label.into()),
            boxed(f),
        )
    }

    /// Schedules a callback for the next-tick phase. With
    /// `MicrotaskMode::Single` this is the same as `queue_microtask`.
    pub fn queue_next_tick<F, R>(&self, f: F) -> CallbackId
    where
        F: FnOnce(&EventLoop) -> R + 'static,
        R: TaskOutput,
    {
        self.push_microtask(TaskSource::NextTick, CallbackKind::Plain, None, boxed(f))
    }

    pub(crate) fn enqueue_continuation(&self, body: CallbackFn) -> CallbackId {
        self.push_microtask(TaskSource::Microtask, CallbackKind::Continuation, None, body)
    }

    pub fn set_timeout<F, R>(&self, delay_ms: i64, f: F) -> TimerId
    where
        F: FnOnce(&EventLoop) -> R + 'static,
        R: TaskOutput,
    {
        self.schedule_timer(None, delay_ms, TimerBody::Once(boxed(f)))
    }

    pub fn set_timeout_labelled<F, R>(
        &self,
        label: impl Into<Cow<'static, str>>,
        delay_ms: i64,
        f: F,
    ) -> TimerId
    where
        F: FnOnce(&EventLoop) -> R + 'static,
        R: TaskOutput,
    {
        self.schedule_timer(Some(label.into()), delay_ms, TimerBody::Once(boxed(f)))
    }

    /// Runs `f` every `period_ms` until the returned timer is cancelled. The
    /// period is raised to `LoopConfig::min_interval_ms` if smaller.
    pub fn set_interval<F, R>(&self, period_ms: i64, mut f: F) -> TimerId
    where
        F: FnMut(&EventLoop) -> R + 'static,
        R: TaskOutput,
    {
        let period = (period_ms.max(0) as u64).max(self.config.min_interval_ms.max(1));
        let body: IntervalFn = Box::new(move |event_loop: &EventLoop| f(event_loop).into_result());
        self.schedule_timer(
            None,
            period as i64,
            TimerBody::Interval {
                period,
                body: Rc::new(RefCell::new(body)),
            },
        )
    }

    /// Queues a macrotask directly, the way an I/O completion would arrive.
    /// Timers already due at the current time are queued ahead of it.
    pub fn post_macrotask<F, R>(&self, f: F) -> CallbackId
    where
        F: FnOnce(&EventLoop) -> R + 'static,
        R: TaskOutput,
    {
        self.promote_due_timers();
        let id = self.allocate_id();
        let callback = Callback::new(id, CallbackKind::Plain, TaskSource::Posted, None, boxed(f));
        self.macrotasks.borrow_mut().enqueue(Macrotask::Ready(callback));
        id
    }

    /// Returns `true` exactly once for a timer that has not fired yet.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let cancelled = self.timers.borrow_mut().cancel(id);
        match cancelled {
            Ok(callback) => {
                tracing::debug!(%callback, at = self.now(), "timer cancelled");
                self.record(|| TraceEvent::TimerCancelled {
                    callback,
                    at: self.now(),
                });
                true
            }
            Err(error) => {
                tracing::debug!(%error, "cancel ignored");
                false
            }
        }
    }

    /// Starts a timer that cancels the returned flag when it fires.
    pub fn timeout_signal(&self, delay_ms: i64) -> (CancelFlag, TimerId) {
        let flag = CancelFlag::new();
        let signal = flag.clone();
        let timer = self.set_timeout_labelled("timeout-signal", delay_ms, move |_| {
            signal.cancel();
        });
        (flag, timer)
    }

    /// Replaces the hook that receives every callback failure.
    pub fn on_unhandled_error<H>(&self, handler: H)
    where
        H: FnMut(&CallbackFailure) + 'static,
    {
        self.executor.set_hook(Box::new(handler));
    }

    pub(crate) fn set_error_hook(&self, hook: ErrorHook) {
        self.executor.set_hook(hook);
    }

    pub fn remote(&self) -> RemoteHandle {
        RemoteHandle::new(self.remote_tx.clone())
    }

    /// Drops all pending work without running it. Returns how many callbacks
    /// and timers were discarded.
    pub fn clear(&self) -> usize {
        let mut dropped =
            self.next_ticks.borrow_mut().clear() + self.microtasks.borrow_mut().clear();
        // Promoted timers are counted once, through the registry.
        let mut macrotasks = self.macrotasks.borrow_mut();
        while let Some(task) = macrotasks.dequeue_one() {
            if matches!(task, Macrotask::Ready(_)) {
                dropped += 1;
            }
        }
        drop(macrotasks);
        dropped += self.timers.borrow_mut().clear();
        while self.remote_rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    // ---- driving ----------------------------------------------------------

    /// Drives the loop until nothing is left to run.
    ///
    /// Running an already idle loop does nothing and returns an empty report.
    pub fn run(&self) -> Result<RunReport, LoopError> {
        self.drive_with(|| {})
    }

    /// Runs `script` as the initial synchronous code, then drives the loop.
    pub fn run_script<F, R>(&self, script: F) -> Result<RunReport, LoopError>
    where
        F: FnOnce(&EventLoop) -> R + 'static,
        R: TaskOutput,
    {
        self.drive_with(|| {
            self.phase.set(LoopPhase::RunningSync);
            let id = self.allocate_id();
            let callback =
                Callback::new(id, CallbackKind::Plain, TaskSource::Script, None, boxed(script));
            self.execute(callback);
        })
    }

    fn drive_with(&self, prelude: impl FnOnce()) -> Result<RunReport, LoopError> {
        if self.driving.replace(true) {
            return Err(LoopError::Reentrant);
        }
        let guard = DriveGuard { event_loop: self };
        let before = self.stats.get();
        tracing::debug!(at = self.now(), "event loop started");

        prelude();
        let result = self.drive();

        drop(guard);
        let report = RunReport::between(before, self.stats.get(), self.now());
        tracing::debug!(
            at = report.final_time,
            callbacks = report.callbacks_run(),
            failures = report.failures,
            "event loop stopped"
        );
        result.map(|()| report)
    }

    fn drive(&self) -> Result<(), LoopError> {
        let mut budget = Budget::new(self.config.max_callbacks);
        loop {
            self.drain_microtasks(&mut budget)?;

            self.promote_due_timers();
            self.absorb_remote();
            self.discard_cancelled_timers();
            if !self.macrotasks.borrow().is_empty() {
                budget.charge()?;
                if let Some(callback) = self.next_macrotask() {
                    self.phase.set(LoopPhase::RunningMacrotask);
                    self.execute(callback);
                }
                continue;
            }

            let next_deadline = self.timers.borrow().next_deadline();
            match next_deadline {
                Some(deadline) => self.advance_to(deadline),
                None => return Ok(()),
            }
        }
    }

    fn drain_microtasks(&self, budget: &mut Budget) -> Result<(), LoopError> {
        match self.config.microtask_mode {
            MicrotaskMode::Single => self.drain_queue(&self.microtasks, budget),
            MicrotaskMode::NextTickFirst => loop {
                self.drain_queue(&self.next_ticks, budget)?;
                self.drain_queue(&self.microtasks, budget)?;
                if self.next_ticks.borrow().is_empty() {
                    return Ok(());
                }
            },
        }
    }

    /// Pops one callback at a time so callbacks enqueued mid-drain run in the
    /// same drain.
    fn drain_queue(
        &self,
        queue: &RefCell<TaskQueue<Callback>>,
        budget: &mut Budget,
    ) -> Result<(), LoopError> {
        loop {
            if queue.borrow().is_empty() {
                return Ok(());
            }
            budget.charge()?;
            let Some(callback) = queue.borrow_mut().dequeue_one() else {
                return Ok(());
            };
            self.phase.set(LoopPhase::DrainingMicrotasks);
            self.execute(callback);
        }
    }

    /// Drops queue-front entries of timers cancelled after promotion, so the
    /// front is runnable work or the queue is empty.
    fn discard_cancelled_timers(&self) {
        let mut macrotasks = self.macrotasks.borrow_mut();
        let timers = self.timers.borrow();
        while let Some(Macrotask::Timer(id)) = macrotasks.front() {
            if timers.contains(*id) {
                break;
            }
            macrotasks.dequeue_one();
        }
    }

    /// Dequeues the next runnable macrotask, skipping cancelled timers.
    fn next_macrotask(&self) -> Option<Callback> {
        loop {
            let task = self.macrotasks.borrow_mut().dequeue_one()?;
            match task {
                Macrotask::Ready(callback) => return Some(callback),
                Macrotask::Timer(id) => {
                    let fired = self.timers.borrow_mut().fire(id);
                    let Some(fired) = fired else {
                        continue;
                    };
                    let (source, body): (TaskSource, CallbackFn) = match fired.body {
                        FiredBody::Once(body) => (TaskSource::Timer, body),
                        FiredBody::Interval(body) => (
                            TaskSource::Interval,
                            Box::new(move |event_loop: &EventLoop| {
                                let mut interval = body.borrow_mut();
                                (*interval)(event_loop)
                            }),
                        ),
                    };
                    tracing::trace!(callback = %fired.callback, deadline = fired.deadline, "timer fired");
                    return Some(Callback::new(
                        fired.callback,
                        CallbackKind::Plain,
                        source,
                        fired.label,
                        body,
                    ));
                }
            }
        }
    }

    fn promote_due_timers(&self) {
        let due = self.timers.borrow_mut().promote_due(self.now());
        if due.is_empty() {
            return;
        }
        let mut macrotasks = self.macrotasks.borrow_mut();
        for id in due {
            macrotasks.enqueue(Macrotask::Timer(id));
        }
    }

    fn absorb_remote(&self) {
        while let Ok(job) = self.remote_rx.try_recv() {
            let id = self.allocate_id();
            let body: CallbackFn = job;
            let callback = Callback::new(id, CallbackKind::Plain, TaskSource::Remote, None, body);
            self.macrotasks.borrow_mut().enqueue(Macrotask::Ready(callback));
        }
    }

    fn advance_to(&self, deadline: u64) {
        let from = self.now();
        if deadline <= from {
            return;
        }
        self.now.set(deadline);
        self.update_stats(|stats| stats.time_advances += 1);
        self.record(|| TraceEvent::TimeAdvanced { from, to: deadline });
        tracing::trace!(from, to = deadline, "advanced logical time");
    }

    fn execute(&self, callback: Callback) {
        let id = callback.id();
        let source = callback.source();
        self.update_stats(|stats| stats.record_run(source));
        self.record(|| TraceEvent::Executed {
            callback: id,
            label: callback.label().map(str::to_owned),
            kind: callback.kind(),
            source,
            at: self.now(),
        });
        tracing::trace!(callback = %id, %source, at = self.now(), "running callback");

        if !self.executor.run(self, callback) {
            self.update_stats(|stats| stats.failures += 1);
            self.record(|| TraceEvent::Failed {
                callback: id,
                at: self.now(),
            });
        }
    }

    // ---- helpers ----------------------------------------------------------

    fn push_microtask(
        &self,
        source: TaskSource,
        kind: CallbackKind,
        label: Option<Cow<'static, str>>,
        body: CallbackFn,
    ) -> CallbackId {
        let id = self.allocate_id();
        let callback = Callback::new(id, kind, source, label, body);
        let queue = match (source, self.config.microtask_mode) {
            (TaskSource::NextTick, MicrotaskMode::NextTickFirst) => &self.next_ticks,
            _ => &self.microtasks,
        };
        queue.borrow_mut().enqueue(callback);
        id
    }

    fn schedule_timer(
        &self,
        label: Option<Cow<'static, str>>,
        delay_ms: i64,
        body: TimerBody,
    ) -> TimerId {
        let callback = self.allocate_id();
        let now = self.now();
        let (timer, deadline) = self
            .timers
            .borrow_mut()
            .schedule(callback, label, now, delay_ms, body);
        tracing::debug!(%callback, delay_ms, deadline, "timer scheduled");
        self.record(|| TraceEvent::TimerScheduled {
            callback,
            deadline,
            at: now,
        });
        timer
    }

    fn allocate_id(&self) -> CallbackId {
        let id = self.next_callback.get();
        self.next_callback.set(id + 1);
        CallbackId(id)
    }

    fn update_stats(&self, f: impl FnOnce(&mut LoopStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn record(&self, event: impl FnOnce() -> TraceEvent) {
        if self.config.record_trace {
            self.trace.borrow_mut().push(event());
        }
    }
}

impl crate::Scheduler for EventLoop {
    fn schedule_microtask(&self, task: Box<dyn FnOnce(&EventLoop) -> CallbackResult>) {
        self.queue_microtask(task);
    }

    fn schedule_macrotask(
        &self,
        task: Box<dyn FnOnce(&EventLoop) -> CallbackResult>,
        delay_ms: i64,
    ) -> TimerId {
        self.set_timeout(delay_ms, task)
    }

    fn run(&self) -> Result<RunReport, LoopError> {
        EventLoop::run(self)
    }

    fn on_unhandled_error(&self, handler: ErrorHook) {
        self.set_error_hook(handler);
    }

    fn now(&self) -> u64 {
        EventLoop::now(self)
    }
}
