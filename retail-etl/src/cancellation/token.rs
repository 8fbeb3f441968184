//! Cooperative cancellation for pipeline runs.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// A callback invoked once when a run is cancelled.
pub type CancelCallback = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    callbacks: RwLock<Vec<CancelCallback>>,
    notify: Notify,
}

/// Shared cancellation flag for a run.
///
/// Clones observe the same flag. The orchestrator checks it before each
/// stage and while waiting between attempts; a stage already executing
/// runs to completion. Only the first reason is kept.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Later calls are ignored.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let reason = reason.into();
        *self.inner.reason.write() = Some(reason.clone());
        self.inner.notify.notify_waiters();

        for callback in self.inner.callbacks.read().iter() {
            Self::invoke(callback.as_ref(), &reason);
        }
    }

    /// Registers a callback; runs it immediately if already cancelled.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        if let Some(reason) = self.reason() {
            Self::invoke(&callback, &reason);
        } else {
            self.inner.callbacks.write().push(Box::new(callback));
        }
    }

    fn invoke(callback: &(dyn Fn(&str) + Send + Sync), reason: &str) {
        if let Err(e) =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(reason)))
        {
            warn!("Cancellation callback panicked: {:?}", e);
        }
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if cancelled.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.read().clone()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        token.cancel("interrupted");
        token.cancel("second");

        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("interrupted"));
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let handle = token.clone();
        handle.cancel("signal");
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_callbacks_receive_reason() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        token.on_cancel(move |reason| {
            assert_eq!(reason, "stop");
            seen.fetch_add(1, Ordering::SeqCst);
        });
        token.on_cancel(|_| panic!("callback failure is contained"));

        token.cancel("stop");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let late = calls.clone();
        token.on_cancel(move |_| {
            late.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(5)).await;
        token.cancel("done");
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
