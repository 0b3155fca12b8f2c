//! Cooperative cancellation
//!
//! A single token is threaded through the scanner, segment processor,
//! and upload/download workers. In-flight network I/O is interrupted
//! where possible; hash and cipher work completes to its segment
//! boundary before the worker observes the token and exits.

use tokio::sync::watch;

/// Clonable cancellation token. Any clone may signal; all clones
/// observe.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A fresh, un-signalled token
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        // send only fails when every receiver is gone, which is fine
        let _ = self.tx.send(true);
    }

    /// Non-blocking check, used at loop boundaries
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is signalled. Used in `select!` arms
    /// against network I/O.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // wait_for returns Err only when the sender is dropped; treat a
        // dropped sender as "never cancelled" and park forever
        if rx.wait_for(|v| *v).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
