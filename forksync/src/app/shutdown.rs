//! Batch cancellation
//!
//! An operator interrupt flips a watch channel. Pipelines poll it at
//! checkpoint boundaries and stop with [`SyncError::Cancelled`]; nothing is
//! killed in the middle of a write.

use tokio::sync::watch;
use tracing::info;

use crate::errors::SyncError;

/// Sending side, owned by whoever handles signals
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Receiving side, cloned into every pipeline
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

/// Create a connected trigger and signal
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    pub fn cancel(&self) {
        if !*self.tx.borrow() {
            info!("Cancelling; in-flight projects stop at their next checkpoint");
        }
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Fail with `Cancelled` once the batch is cancelling
    pub fn check(&self) -> Result<(), SyncError> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve when cancellation is requested. Never resolves if the
    /// trigger is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
