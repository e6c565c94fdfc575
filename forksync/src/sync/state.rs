//! Synchronization state machine
//!
//! `Idle -> RemoteVerified -> Fetched -> Merged -> Pushed -> Done`, with
//! `ConflictDetected` reachable only between `Fetched` and `Merged`.

use serde::{Deserialize, Serialize};

/// Sync state of one project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    RemoteVerified,
    Fetched,
    ConflictDetected,
    Merged,
    Pushed,
    Done,
    Failed,
}

/// Sync event
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Both remotes point where they should
    RemotesVerified,

    /// Upstream fetched
    Fetched,

    /// Merge finished without conflicts
    MergeClean,

    /// Merge stopped on conflicting paths
    Conflicts(Vec<String>),

    /// Every conflict was resolved by policy
    ConflictsResolved,

    /// Branch pushed to origin
    Pushed,

    /// Post-push work finished
    Completed,

    /// Unrecoverable error
    Fail(String),
}

#[derive(Debug, Clone)]
pub struct SyncFsm {
    state: SyncState,
    error: Option<String>,
    conflicts: Vec<String>,
}

impl SyncFsm {
    pub fn new() -> Self {
        Self {
            state: SyncState::Idle,
            error: None,
            conflicts: Vec::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Paths that conflicted during the merge
    pub fn conflicts(&self) -> &[String] {
        &self.conflicts
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: SyncEvent) -> Result<SyncState, String> {
        let new_state = match (self.state, &event) {
            (SyncState::Idle, SyncEvent::RemotesVerified) => SyncState::RemoteVerified,
            (SyncState::RemoteVerified, SyncEvent::Fetched) => SyncState::Fetched,
            (SyncState::Fetched, SyncEvent::MergeClean) => SyncState::Merged,
            (SyncState::Fetched, SyncEvent::Conflicts(paths)) => {
                self.conflicts = paths.clone();
                SyncState::ConflictDetected
            }
            (SyncState::ConflictDetected, SyncEvent::ConflictsResolved) => SyncState::Merged,
            (SyncState::Merged, SyncEvent::Pushed) => SyncState::Pushed,
            (SyncState::Pushed, SyncEvent::Completed) => SyncState::Done,

            (SyncState::Done | SyncState::Failed, SyncEvent::Fail(_)) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", self.state, event));
            }
            (_, SyncEvent::Fail(err)) => {
                self.error = Some(err.clone());
                SyncState::Failed
            }

            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for SyncFsm {
    fn default() -> Self {
        Self::new()
    }
}
