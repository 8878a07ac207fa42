use std::sync::mpsc::Sender;

use crate::error::LoopError;
use crate::event_loop::EventLoop;
use crate::task::{CallbackResult, TaskOutput};

pub(crate) type RemoteJob = Box<dyn FnOnce(&EventLoop) -> CallbackResult + Send>;

/// Sending half of the hand-off queue into an `EventLoop`.
///
/// Other threads never touch the loop's own queues. Jobs posted here wait in a
/// channel until the driver moves them into the macrotask queue.
#[derive(Clone)]
pub struct RemoteHandle {
    sender: Sender<RemoteJob>,
}

impl RemoteHandle {
    pub(crate) fn new(sender: Sender<RemoteJob>) -> Self {
        Self { sender }
    }

    pub fn post<F, R>(&self, job: F) -> Result<(), LoopError>
    where
        F: FnOnce(&EventLoop) -> R + Send + 'static,
        R: TaskOutput,
    {
        self.sender
            .send(Box::new(move |event_loop: &EventLoop| job(event_loop).into_result()))
            .map_err(|_| LoopError::Closed)
    }
}
