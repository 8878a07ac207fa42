use std::borrow::Cow;
use std::fmt;

use crate::error::CallbackError;
use crate::event_loop::EventLoop;

pub type CallbackResult = Result<(), CallbackError>;

pub(crate) type CallbackFn = Box<dyn FnOnce(&EventLoop) -> CallbackResult>;

/// Identity of a scheduled callback, unique within one `EventLoop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CallbackId(pub(crate) u64);

impl CallbackId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a callback came to be enqueued. Fixed when the callback is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum CallbackKind {
    Plain,
    /// Resumption of work that was waiting on a promise.
    Continuation,
}

/// The queue (or entry point) a callback was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum TaskSource {
    Script,
    NextTick,
    Microtask,
    Timer,
    Interval,
    Posted,
    Remote,
}

impl TaskSource {
    pub fn is_microtask(self) -> bool {
        matches!(self, Self::NextTick | Self::Microtask)
    }
}

impl fmt::Display for TaskSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Script => "script",
            Self::NextTick => "next-tick",
            Self::Microtask => "microtask",
            Self::Timer => "timer",
            Self::Interval => "interval",
            Self::Posted => "posted",
            Self::Remote => "remote",
        };
        f.write_str(name)
    }
}

/// Return types a callback body may have.
///
/// Lets infallible closures return `()` while fallible ones return
/// `Result<(), CallbackError>` and use `?`.
pub trait TaskOutput {
    fn into_result(self) -> CallbackResult;
}

impl TaskOutput for () {
    fn into_result(self) -> CallbackResult {
        Ok(())
    }
}

impl TaskOutput for CallbackResult {
    fn into_result(self) -> CallbackResult {
        self
    }
}

pub(crate) fn boxed<F, R>(f: F) -> CallbackFn
where
    F: FnOnce(&EventLoop) -> R + 'static,
    R: TaskOutput,
{
    Box::new(move |event_loop: &EventLoop| f(event_loop).into_result())
}

/// A unit of work sitting in one of the loop's queues.
pub struct Callback {
    id: CallbackId,
    label: Option<Cow<'static, str>>,
    kind: CallbackKind,
    source: TaskSource,
    enqueued_at: u64,
    body: CallbackFn,
}

impl Callback {
    pub(crate) fn new(
        id: CallbackId,
        kind: CallbackKind,
        source: TaskSource,
        label: Option<Cow<'static, str>>,
        body: CallbackFn,
    ) -> Self {
        Self {
            id,
            label,
            kind,
            source,
            enqueued_at: 0,
            body,
        }
    }

    pub fn id(&self) -> CallbackId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn kind(&self) -> CallbackKind {
        self.kind
    }

    pub fn source(&self) -> TaskSource {
        self.source
    }

    /// Position in its queue's insertion order.
    pub fn enqueued_at(&self) -> u64 {
        self.enqueued_at
    }

    pub(crate) fn into_parts(self) -> (CallbackMeta, CallbackFn) {
        let meta = CallbackMeta {
            id: self.id,
            label: self.label,
            kind: self.kind,
            source: self.source,
        };
        (meta, self.body)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

pub(crate) struct CallbackMeta {
    pub id: CallbackId,
    pub label: Option<Cow<'static, str>>,
    pub kind: CallbackKind,
    pub source: TaskSource,
}

/// Anything a `TaskQueue` can hold. The queue stamps each entry on insertion.
pub(crate) trait Stamped {
    fn stamp(&mut self, stamp: u64);
}

impl Stamped for Callback {
    fn stamp(&mut self, stamp: u64) {
        self.enqueued_at = stamp;
    }
}
