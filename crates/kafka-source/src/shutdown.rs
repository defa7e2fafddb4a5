//! Cancellation token used to wake a blocked fetch during process shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable cancellation handle.
///
/// A source checks its token between poll slices, so cancelling from any
/// thread (typically a signal handler) unblocks a fetch within one slice.
/// Cancellation is sticky and only ever interrupts; the next poll on a
/// still-open source simply retries.
#[derive(Clone, Debug, Default)]
pub struct ShutdownToken {
    cancelled: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
