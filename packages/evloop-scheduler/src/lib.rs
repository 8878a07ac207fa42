pub mod cancel;
pub mod config;
pub mod error;
pub mod event_loop;
mod executor;
pub mod promise;
mod queue;
pub mod remote;
pub mod task;
pub mod timer;
pub mod trace;

/// The minimal embeddable surface of an event loop.
/// Hosts and tests that only need to schedule work and drive it to completion
/// can depend on this instead of the concrete `EventLoop`.
pub trait Scheduler {
    /// Schedule a microtask (drained completely before the next macrotask).
    /// Used for promise resolution and explicit `queueMicrotask`-style calls.
    fn schedule_microtask(&self, task: Box<dyn FnOnce(&EventLoop) -> CallbackResult>);

    /// Schedule a macrotask that becomes runnable after `delay_ms` logical
    /// milliseconds. Negative delays are treated as zero.
    fn schedule_macrotask(
        &self,
        task: Box<dyn FnOnce(&EventLoop) -> CallbackResult>,
        delay_ms: i64,
    ) -> TimerId;

    /// Drive the loop until no work is left.
    fn run(&self) -> Result<RunReport, LoopError>;

    /// Register the hook that receives every callback failure.
    fn on_unhandled_error(&self, handler: ErrorHook);

    /// Get the current logical time in milliseconds.
    fn now(&self) -> u64;
}

pub use cancel::CancelFlag;
pub use config::{LoopConfig, MicrotaskMode};
pub use error::{CallbackError, CallbackFailure, CancelError, LoopError};
pub use event_loop::{EventLoop, LoopPhase};
pub use executor::ErrorHook;
pub use promise::{Promise, Rejection, Resolver, Settled};
pub use remote::RemoteHandle;
pub use task::{CallbackId, CallbackKind, CallbackResult, TaskOutput, TaskSource};
pub use timer::TimerId;
pub use trace::{LoopStats, RunReport, TraceEvent};
