//! Single-assignment promises whose reactions run as continuation microtasks.
//!
//! This is the `await` half of the loop: code that waits on a value registers
//! a reaction with [`Promise::then`] and returns. When the promise settles each
//! reaction is enqueued on the microtask queue, in registration order.

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::Rc;

use thiserror::Error;

use crate::event_loop::EventLoop;
use crate::task::{CallbackResult, TaskOutput};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("promise rejected: {reason}")]
pub struct Rejection {
    pub reason: String,
}

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

pub type Settled<T> = Result<T, Rejection>;

type Reaction<T> = Box<dyn FnOnce(&EventLoop, Settled<T>) -> CallbackResult>;

enum PromiseState<T> {
    Pending(Vec<Reaction<T>>),
    Settled(Settled<T>),
}

pub struct Promise<T> {
    state: Rc<RefCell<PromiseState<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.borrow() {
            PromiseState::Pending(_) => "pending",
            PromiseState::Settled(Ok(_)) => "fulfilled",
            PromiseState::Settled(Err(_)) => "rejected",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

/// Settles the paired promise. Only the first settlement counts.
pub struct Resolver<T> {
    state: Rc<RefCell<PromiseState<T>>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Clone + 'static> Promise<T> {
    pub fn pending() -> (Self, Resolver<T>) {
        let state = Rc::new(RefCell::new(PromiseState::Pending(Vec::new())));
        (
            Self {
                state: Rc::clone(&state),
            },
            Resolver { state },
        )
    }

    pub fn resolved(value: T) -> Self {
        Self::settled(Ok(value))
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::settled(Err(Rejection::new(reason)))
    }

    fn settled(result: Settled<T>) -> Self {
        Self {
            state: Rc::new(RefCell::new(PromiseState::Settled(result))),
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(&*self.state.borrow(), PromiseState::Settled(_))
    }

    /// The settled value, if any, without waiting.
    pub fn peek(&self) -> Option<Settled<T>> {
        match &*self.state.borrow() {
            PromiseState::Pending(_) => None,
            PromiseState::Settled(result) => Some(result.clone()),
        }
    }

    /// Registers a reaction. If the promise is already settled the reaction is
    /// enqueued right away, never run inline.
    pub fn then<F, R>(&self, event_loop: &EventLoop, reaction: F)
    where
        F: FnOnce(&EventLoop, Settled<T>) -> R + 'static,
        R: TaskOutput,
    {
        let reaction: Reaction<T> =
            Box::new(move |event_loop: &EventLoop, result| reaction(event_loop, result).into_result());

        let settled = match &mut *self.state.borrow_mut() {
            PromiseState::Pending(reactions) => {
                reactions.push(reaction);
                return;
            }
            PromiseState::Settled(result) => result.clone(),
        };
        enqueue_reaction(event_loop, reaction, settled);
    }

    /// Like [`Promise::then`], but the reaction's result settles a new promise.
    pub fn then_chain<U, F>(&self, event_loop: &EventLoop, reaction: F) -> Promise<U>
    where
        U: Clone + 'static,
        F: FnOnce(&EventLoop, Settled<T>) -> Settled<U> + 'static,
    {
        let (next, resolver) = Promise::pending();
        self.then(event_loop, move |event_loop, result| {
            resolver.settle(event_loop, reaction(event_loop, result));
        });
        next
    }
}

impl<T: Clone + 'static> Resolver<T> {
    pub fn resolve(&self, event_loop: &EventLoop, value: T) -> bool {
        self.settle(event_loop, Ok(value))
    }

    pub fn reject(&self, event_loop: &EventLoop, reason: impl Into<String>) -> bool {
        self.settle(event_loop, Err(Rejection::new(reason)))
    }

    /// Returns `false` if the promise had already settled.
    pub fn settle(&self, event_loop: &EventLoop, result: Settled<T>) -> bool {
        let reactions = {
            let mut state = self.state.borrow_mut();
            let PromiseState::Pending(reactions) = &mut *state else {
                return false;
            };
            let reactions = mem::take(reactions);
            *state = PromiseState::Settled(result.clone());
            reactions
        };

        tracing::trace!(reactions = reactions.len(), ok = result.is_ok(), "promise settled");
        for reaction in reactions {
            enqueue_reaction(event_loop, reaction, result.clone());
        }
        true
    }
}

fn enqueue_reaction<T: 'static>(event_loop: &EventLoop, reaction: Reaction<T>, result: Settled<T>) {
    event_loop.enqueue_continuation(Box::new(move |event_loop: &EventLoop| reaction(event_loop, result)));
}
