use std::borrow::Cow;
use std::error::Error as StdError;

use thiserror::Error;

use crate::promise::Rejection;
use crate::task::{CallbackId, CallbackKind, TaskSource};
use crate::timer::TimerId;

/// Failure raised by a user callback body.
///
/// The executor recovers every variant locally and forwards it to the
/// unhandled-error hook; none of them stop the loop.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// An arbitrary error value returned by the callback.
    #[error("{0}")]
    Thrown(Box<dyn StdError + 'static>),

    /// A plain message, the moral equivalent of `throw "..."`.
    #[error("{0}")]
    Message(String),

    /// A promise rejection propagated out of a continuation.
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// The callback panicked; the payload is rendered to a string.
    #[error("callback panicked: {0}")]
    Panicked(String),
}

impl CallbackError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub fn thrown(error: impl StdError + 'static) -> Self {
        Self::Thrown(Box::new(error))
    }
}

/// Everything the error hook learns about a failed callback.
#[derive(Debug, Error)]
#[error("{queue} callback {callback} failed: {error}")]
pub struct CallbackFailure {
    pub callback: CallbackId,
    pub label: Option<Cow<'static, str>>,
    pub kind: CallbackKind,
    pub queue: TaskSource,
    /// Logical time at which the callback ran.
    pub at: u64,
    #[source]
    pub error: CallbackError,
}

/// Errors returned by the driver itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoopError {
    /// `run` was called while the loop was already being driven.
    #[error("event loop is already running")]
    Reentrant,

    /// The per-run callback cap configured in `LoopConfig::max_callbacks` was hit.
    #[error("callback limit of {limit} reached; pending work left queued")]
    CallbackLimit { limit: u64 },

    /// The loop behind a `RemoteHandle` has been dropped.
    #[error("event loop has been dropped")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelError {
    /// The id never existed, already fired, or was already cancelled.
    #[error("unknown timer {0:?}")]
    UnknownTimer(TimerId),
}
