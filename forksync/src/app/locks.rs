//! Per-project locks
//!
//! Serializes everything that touches one project's working directory and
//! checkpoint ledger. Different projects never contend.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ProjectLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the project's lock. Not reentrant: acquiring it twice from
    /// the same task deadlocks.
    pub async fn acquire(&self, project: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(project.to_string()).or_default().clone()
        };
        if lock.try_lock().is_err() {
            debug!(project = %project, "Waiting for project lock");
        }
        lock.lock_owned().await
    }
}
