//! Shutdown signalling.
//!
//! A single [`ShutdownToken`] is the only cross-component signalling
//! primitive in the pipeline: the orchestrator observes it between loop
//! iterations, the ring consumers check it at each record boundary, and the
//! queue's blocking dequeue races against it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Cloneable set-once shutdown flag with async wakeup.
#[derive(Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    signalled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent; wakes every waiter.
    pub fn signal(&self) {
        self.inner.signalled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_signalled(&self) -> bool {
        self.inner.signalled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is signalled. Safe to race against other
    /// futures in a `select!`.
    pub async fn wait(&self) {
        while !self.is_signalled() {
            let notified = self.inner.notify.notified();
            if self.is_signalled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_wakes_waiter() {
        let token = ShutdownToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        token.signal();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_signalled() {
        let token = ShutdownToken::new();
        token.signal();
        assert!(token.is_signalled());
        tokio::time::timeout(Duration::from_millis(100), token.wait())
            .await
            .expect("wait should not block after signal");
    }
}
