use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A single-fire cancellation flag.
///
/// The loop never interrupts a running callback; work that can be cancelled
/// checks the flag itself. The flag is thread-safe so it can also be handed to
/// producers feeding a `RemoteHandle`.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns `true` if this call flipped the flag.
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::Relaxed)
    }
}
