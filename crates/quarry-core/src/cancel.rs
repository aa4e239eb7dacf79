//! Caller-supplied cancellation signal.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Notify;

/// Cloneable cancellation flag shared between a caller and pipeline tasks.
///
/// Every suspension point in the pipeline races its work against
/// [`Cancellation::cancelled`]; once [`cancel`](Cancellation::cancel) is
/// called, all current and future waits resolve immediately.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the signal has been cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Run `future` unless cancellation wins first. Dropping the future on
    /// cancellation releases whatever it held (lock guards, pending tokens).
    pub async fn run<F>(&self, future: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            output = future => Ok(output),
        }
    }
}

/// Marker error returned when a wait was abandoned through [`Cancellation`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled by caller")]
pub struct Cancelled;
