//! Build cancellation signal
//!
//! A `CancelHandle` is held by whoever may abort the build (the CLI's
//! Ctrl-C handler, a test); every container-producing operation takes the
//! matching `Cancellation` and stops waiting as soon as it fires.

use tokio::sync::watch;

/// Trigger side of a cancellation pair
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observer side of a cancellation pair
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// Create a linked handle/observer pair
    pub fn new() -> (CancelHandle, Cancellation) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Cancellation { rx })
    }

    /// An observer that never fires
    pub fn never() -> Cancellation {
        let (_, rx) = watch::channel(false);
        Cancellation { rx }
    }

    /// Whether cancellation was already requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested
    ///
    /// If every handle is dropped without cancelling, this pends forever.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
