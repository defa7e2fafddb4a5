//! Resource cleanup tied to sink shutdown.

use super::Sink;
use anyhow::Result;
use tracing::warn;

type CleanupFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// Forwards everything and releases auxiliary resources when closed.
///
/// Resources are released after the destination has closed, in registration
/// order. A failing cleanup is logged and the remaining ones still run; only
/// the destination's own close error propagates.
pub struct CleanupSink<S> {
    destination: S,
    resources: Vec<(String, CleanupFn)>,
}

impl<S> CleanupSink<S> {
    pub fn new(destination: S) -> Self {
        Self {
            destination,
            resources: Vec::new(),
        }
    }

    /// Register a named resource to release on close.
    pub fn on_close(mut self, name: impl Into<String>, cleanup: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        self.resources.push((name.into(), Box::new(cleanup)));
        self
    }
}

impl<T, S> Sink<T> for CleanupSink<S>
where
    T: Send,
    S: Sink<T>,
{
    fn send(&mut self, item: T) -> Result<()> {
        self.destination.send(item)
    }

    fn close(&mut self) -> Result<()> {
        let result = self.destination.close();
        for (name, cleanup) in self.resources.drain(..) {
            if let Err(e) = cleanup() {
                warn!("Failed to release {name}: {e:#}");
            }
        }
        result
    }
}
