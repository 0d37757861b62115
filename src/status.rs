//! Fire-and-forget progress updates.
//!
//! A [`StatusSink`] carries human-readable progress strings ("Searching the
//! web for ...") from the generation loop and tools to whoever is listening.
//! Emitting never blocks, never fails, and never influences control flow.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

type StatusFn = dyn Fn(&str) + Send + Sync;

/// Optional progress callback shared across one request.
#[derive(Clone, Default)]
pub struct StatusSink {
    inner: Option<Arc<StatusFn>>,
}

impl StatusSink {
    /// A sink that drops every update.
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// Wrap a callback. The callback must return promptly.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            inner: Some(Arc::new(callback)),
        }
    }

    /// A sink backed by an unbounded channel, for consumers that need to await.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self::new(move |status| {
            // Receiver gone means nobody is listening any more.
            let _ = tx.send(status.to_string());
        });
        (sink, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Publish a status update.
    pub fn emit(&self, status: impl AsRef<str>) {
        let status = status.as_ref();
        debug!(status, "status update");
        let Some(callback) = self.inner.as_ref() else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| callback(status))).is_err() {
            warn!("status callback panicked; update dropped");
        }
    }
}

impl fmt::Debug for StatusSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusSink")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
