use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};

use crate::error::{CallbackError, CallbackFailure};
use crate::event_loop::EventLoop;
use crate::task::Callback;

/// Process-wide sink for callback failures.
pub type ErrorHook = Box<dyn FnMut(&CallbackFailure)>;

/// Runs callbacks to completion, one at a time.
///
/// A failing callback (an `Err` return or a panic) is reported to the hook and
/// otherwise swallowed, so the next callback always gets to run.
#[derive(Default)]
pub(crate) struct Executor {
    hook: RefCell<Option<ErrorHook>>,
    hook_generation: Cell<u64>,
}

impl Executor {
    pub fn set_hook(&self, hook: ErrorHook) {
        *self.hook.borrow_mut() = Some(hook);
        self.hook_generation.set(self.hook_generation.get() + 1);
    }

    /// Returns `false` if the callback failed.
    pub fn run(&self, event_loop: &EventLoop, callback: Callback) -> bool {
        let (meta, body) = callback.into_parts();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(event_loop)));

        let error = match outcome {
            Ok(Ok(())) => return true,
            Ok(Err(error)) => error,
            Err(payload) => CallbackError::Panicked(panic_message(payload.as_ref())),
        };

        self.report(CallbackFailure {
            callback: meta.id,
            label: meta.label,
            kind: meta.kind,
            queue: meta.source,
            at: event_loop.now(),
            error,
        });
        false
    }

    fn report(&self, failure: CallbackFailure) {
        // The hook is taken out while it runs so it may install a replacement.
        let generation = self.hook_generation.get();
        let hook = self.hook.borrow_mut().take();
        match hook {
            Some(mut hook) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| hook(&failure)));
                if self.hook_generation.get() == generation {
                    *self.hook.borrow_mut() = Some(hook);
                }
                if let Err(payload) = outcome {
                    tracing::error!(
                        callback = %failure.callback,
                        queue = %failure.queue,
                        "error hook panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }
            None => {
                tracing::error!(
                    callback = %failure.callback,
                    label = failure.label.as_deref().unwrap_or(""),
                    queue = %failure.queue,
                    "unhandled callback error: {}",
                    failure.error
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
