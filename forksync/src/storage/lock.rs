//! Process-wide advisory lock
//!
//! Prevents two invocations from working on the same installation. The lock
//! file holds a JSON owner record; an owner that is no longer alive is
//! treated as stale and its file is replaced. The record is written to a
//! private file first and linked into place, so the lock never exists
//! without an owner.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::errors::SyncError;

/// Age after which a lock file without a readable owner counts as abandoned
const UNREADABLE_GRACE: Duration = Duration::from_secs(30);

/// Owner record stored in the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockOwner {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            acquired_at: Utc::now(),
        }
    }
}

/// Decides whether a recorded lock owner still runs
pub trait Liveness: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Liveness backed by the OS process table
#[derive(Debug, Default)]
pub struct SysinfoLiveness;

impl Liveness for SysinfoLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing(),
        );
        system.process(pid).is_some()
    }
}

/// A held instance lock; the file is removed on drop
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    owner: LockOwner,
}

impl InstanceLock {
    /// Acquire the lock at `path`. A stale file left by a dead owner is
    /// removed and acquisition is retried once.
    pub fn acquire(path: &Path, liveness: &dyn Liveness) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        for attempt in 0..2 {
            match Self::create(path) {
                Ok(lock) => return Ok(lock),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempt == 0 => {
                    match Self::read_owner(path) {
                        Some(owner) if owner.pid == std::process::id() || liveness.is_alive(owner.pid) => {
                            return Err(SyncError::LockHeld {
                                pid: owner.pid,
                                path: path.to_path_buf(),
                            });
                        }
                        Some(owner) => {
                            warn!("Removing stale lock of dead process {}", owner.pid);
                        }
                        None if !Self::abandoned(path) => {
                            return Err(SyncError::LockHeld {
                                pid: 0,
                                path: path.to_path_buf(),
                            });
                        }
                        None => warn!("Removing unreadable lock file {}", path.display()),
                    }
                    match std::fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let pid = Self::read_owner(path).map(|o| o.pid).unwrap_or_default();
                    return Err(SyncError::LockHeld {
                        pid,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SyncError::Internal(format!(
            "Unable to acquire {}",
            path.display()
        )))
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let owner = LockOwner::current();
        let record = serde_json::to_vec_pretty(&owner)?;

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("lock");
        let staged = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
        let written = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staged)
            .and_then(|mut file| {
                file.write_all(&record)?;
                file.sync_all()
            });
        // hard_link fails with AlreadyExists when another owner got there first
        let published = written.and_then(|()| std::fs::hard_link(&staged, path));
        let _ = std::fs::remove_file(&staged);
        published?;

        debug!("Acquired instance lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            owner,
        })
    }

    /// A lock file with no readable owner that has not been touched for a while
    fn abandoned(path: &Path) -> bool {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .map(|age| age > UNREADABLE_GRACE)
            .unwrap_or(true)
    }

    /// Current holder of the lock at `path`, if any
    pub fn read_owner(path: &Path) -> Option<LockOwner> {
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}
