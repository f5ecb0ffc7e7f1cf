//! Cooperative cancellation for jobs and their in-flight source calls.
//!
//! A cancel signal propagates top-down: the job controller holds the
//! handle, every waiter selects on `cancelled()` at its suspension points.

use std::sync::Arc;
use tokio::sync::watch;

/// Sender side, held by the job controller.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiver side, cloned into every task that must observe cancellation.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    // Keeps the channel alive for tokens created without a handle
    _guard: Option<Arc<watch::Sender<bool>>>,
}

impl CancelToken {
    pub fn new_pair() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx, _guard: None })
    }

    /// A token that never fires. For stats calls and tests.
    pub fn never() -> CancelToken {
        let (tx, rx) = watch::channel(false);
        CancelToken { rx, _guard: Some(Arc::new(tx)) }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is signalled. If the handle is dropped
    /// without cancelling, this never resolves.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fires_on_cancel() {
        let (handle, token) = CancelToken::new_pair();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
        // must resolve promptly
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("cancelled() should resolve after cancel");
    }

    #[tokio::test]
    async fn never_token_does_not_fire() {
        let token = CancelToken::never();
        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await.is_err();
        assert!(timed_out);
    }
}
