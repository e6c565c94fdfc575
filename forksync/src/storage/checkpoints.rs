//! Checkpoint store
//!
//! One ledger per project under `checkpoints/<project>/ledger.json`, plus
//! content-addressed repository bundles under `backups/<project>/`. Every
//! append rewrites the ledger through a temp file and a rename, so readers
//! never observe a partially written checkpoint.
//!
//! Writers for the same project are serialized by the caller (the
//! per-project lock held for the whole pipeline).

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::errors::SyncError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::checkpoint::{Checkpoint, CheckpointLabel, Ledger};
use crate::storage::layout::StorageLayout;
use crate::utils::hex;

const LEDGER_FILE: &str = "ledger.json";
const BUNDLE_EXT: &str = "bundle";

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    checkpoints_dir: Dir,
    backups_dir: Dir,
}

impl CheckpointStore {
    pub fn new(layout: &StorageLayout) -> Self {
        Self {
            checkpoints_dir: layout.checkpoints_dir(),
            backups_dir: layout.backups_dir(),
        }
    }

    fn ledger_file(&self, project: &str) -> File {
        self.checkpoints_dir
            .subdir(&ledger_dir_name(project))
            .file(LEDGER_FILE)
    }

    fn bundle_dir(&self, project: &str) -> Dir {
        self.backups_dir.subdir(&ledger_dir_name(project))
    }

    /// The project's ledger; empty when nothing was written yet
    pub async fn ledger(&self, project: &str) -> Result<Ledger, SyncError> {
        let ledger = self
            .ledger_file(project)
            .read_json_opt::<Ledger>()
            .await?
            .unwrap_or_else(|| Ledger::new(project));
        Ok(ledger)
    }

    async fn save(&self, ledger: &Ledger) -> Result<(), SyncError> {
        self.ledger_file(&ledger.project).write_json(ledger).await
    }

    /// Append a checkpoint
    pub async fn write(
        &self,
        project: &str,
        label: CheckpointLabel,
        revision: &str,
        metadata: BTreeMap<String, serde_json::Value>,
        bundle: Option<String>,
    ) -> Result<Checkpoint, SyncError> {
        let mut ledger = self.ledger(project).await?;
        let seq = ledger.next_seq.max(1);

        let checkpoint = Checkpoint {
            project: project.to_string(),
            seq,
            label,
            revision: revision.to_string(),
            created_at: Utc::now(),
            metadata,
            bundle,
        };
        ledger.checkpoints.push(checkpoint.clone());
        ledger.next_seq = seq + 1;
        self.save(&ledger).await?;

        info!(
            project = %project,
            seq,
            label = %label,
            "Checkpoint written at {}",
            checkpoint.short_revision()
        );
        Ok(checkpoint)
    }

    /// All checkpoints of a project, oldest first
    pub async fn list(&self, project: &str) -> Result<Vec<Checkpoint>, SyncError> {
        Ok(self.ledger(project).await?.checkpoints)
    }

    /// Latest checkpoint with `label`
    pub async fn get(&self, project: &str, label: CheckpointLabel) -> Result<Checkpoint, SyncError> {
        self.ledger(project)
            .await?
            .find_label(label)
            .cloned()
            .ok_or_else(|| SyncError::CheckpointNotFound {
                project: project.to_string(),
                label: label.to_string(),
            })
    }

    pub async fn get_seq(&self, project: &str, seq: u64) -> Result<Checkpoint, SyncError> {
        self.ledger(project)
            .await?
            .find_seq(seq)
            .cloned()
            .ok_or_else(|| SyncError::CheckpointNotFound {
                project: project.to_string(),
                label: format!("#{}", seq),
            })
    }

    pub async fn latest(&self, project: &str) -> Result<Option<Checkpoint>, SyncError> {
        Ok(self.ledger(project).await?.checkpoints.last().cloned())
    }

    /// Names of all projects with a ledger
    pub async fn projects(&self) -> Result<Vec<String>, SyncError> {
        let mut projects = Vec::new();
        for dir in self.checkpoints_dir.list_dirs().await? {
            let file = File::new(dir.join(LEDGER_FILE));
            if let Some(ledger) = file.read_json_opt::<Ledger>().await? {
                projects.push(ledger.project);
            }
        }
        Ok(projects)
    }

    /// Latest checkpoint of every project
    pub async fn heads(&self) -> Result<Vec<Checkpoint>, SyncError> {
        let mut heads = Vec::new();
        for project in self.projects().await? {
            if let Some(head) = self.latest(&project).await? {
                heads.push(head);
            }
        }
        Ok(heads)
    }

    /// Record that the project was rolled back to checkpoint `seq`
    pub async fn mark_reverted(&self, project: &str, seq: u64) -> Result<(), SyncError> {
        let mut ledger = self.ledger(project).await?;
        ledger.reverted_to = Some(seq);
        self.save(&ledger).await
    }

    /// Remove checkpoints older than `retention`. The latest `before_update`
    /// checkpoint is always kept, whatever its age.
    pub async fn prune(
        &self,
        project: &str,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Checkpoint>, SyncError> {
        let mut ledger = self.ledger(project).await?;
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| SyncError::ConfigError(format!("retention: {}", e)))?;
        let cutoff = now - retention;
        let protected = ledger
            .find_label(CheckpointLabel::BeforeUpdate)
            .map(|c| c.seq);

        let (removed, kept): (Vec<_>, Vec<_>) = ledger
            .checkpoints
            .into_iter()
            .partition(|c| c.created_at < cutoff && Some(c.seq) != protected);
        ledger.checkpoints = kept;

        if !removed.is_empty() {
            self.save(&ledger).await?;
            debug!(project = %project, "Pruned {} checkpoints", removed.len());
        }
        Ok(removed)
    }

    /// Path of a bundle by digest
    pub fn bundle_path(&self, project: &str, digest: &str) -> PathBuf {
        self.bundle_dir(project)
            .path()
            .join(format!("{}.{}", digest, BUNDLE_EXT))
    }

    /// Fresh path to write a bundle to before it is stored
    pub async fn staging_path(&self, project: &str) -> Result<PathBuf, SyncError> {
        let dir = self.bundle_dir(project);
        dir.create().await?;
        Ok(dir
            .path()
            .join(format!(".staging-{}.{}", uuid::Uuid::new_v4(), BUNDLE_EXT)))
    }

    /// Move a finished bundle into content-addressed storage and return its digest
    pub async fn store_bundle(&self, project: &str, staged: &Path) -> Result<String, SyncError> {
        let digest = digest_file(staged).await?;
        let target = self.bundle_path(project, &digest);

        if File::new(&target).exists().await {
            File::new(staged).delete().await?;
        } else {
            tokio::fs::rename(staged, &target).await?;
        }
        Ok(digest)
    }

    /// Latest bundle recorded at or before checkpoint `seq`
    pub async fn nearest_bundle(&self, project: &str, seq: u64) -> Result<Option<PathBuf>, SyncError> {
        let ledger = self.ledger(project).await?;
        let bundle = ledger
            .checkpoints
            .iter()
            .rev()
            .filter(|c| c.seq <= seq)
            .find_map(|c| c.bundle.as_deref())
            .or_else(|| ledger.checkpoints.iter().rev().find_map(|c| c.bundle.as_deref()));

        Ok(bundle.map(|digest| self.bundle_path(project, digest)))
    }

    /// Delete bundles no remaining checkpoint refers to
    pub async fn prune_bundles(&self, project: &str) -> Result<usize, SyncError> {
        let ledger = self.ledger(project).await?;
        let referenced: HashSet<&str> = ledger
            .checkpoints
            .iter()
            .filter_map(|c| c.bundle.as_deref())
            .collect();

        let mut removed = 0;
        for path in self.bundle_dir(project).list_files().await? {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !referenced.contains(stem.as_str()) {
                File::new(&path).delete().await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Directory name for a project; names are not trusted as path components.
/// Distinct names can share a directory (`a/b`, `a_b`), the registry refuses
/// such pairs.
pub fn ledger_dir_name(project: &str) -> String {
    project
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

async fn digest_file(path: &Path) -> Result<String, SyncError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::sha256_hash;

    fn store(dir: &Path) -> CheckpointStore {
        CheckpointStore::new(&StorageLayout::new(dir))
    }

    #[tokio::test]
    async fn test_sequence_is_monotonic() {
        let home = tempfile::tempdir().unwrap();
        let store = store(home.path());

        let a = store
            .write("p", CheckpointLabel::BeforeUpdate, "aaa", BTreeMap::new(), None)
            .await
            .unwrap();
        let b = store
            .write("p", CheckpointLabel::AfterFetch, "aaa", BTreeMap::new(), None)
            .await
            .unwrap();
        assert_eq!((a.seq, b.seq), (1, 2));

        let labels: Vec<_> = store.list("p").await.unwrap().iter().map(|c| c.label).collect();
        assert_eq!(labels, vec![CheckpointLabel::BeforeUpdate, CheckpointLabel::AfterFetch]);
        assert!(store.list("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_unknown_label() {
        let home = tempfile::tempdir().unwrap();
        let result = store(home.path()).get("p", CheckpointLabel::AfterPush).await;
        assert!(matches!(result, Err(SyncError::CheckpointNotFound { .. })));
    }

    #[tokio::test]
    async fn test_prune_keeps_latest_before_update_and_sequence() {
        let home = tempfile::tempdir().unwrap();
        let store = store(home.path());
        for label in [CheckpointLabel::BeforeUpdate, CheckpointLabel::AfterFetch] {
            store.write("p", label, "r", BTreeMap::new(), None).await.unwrap();
        }

        let future = Utc::now() + chrono::Duration::days(365);
        let removed = store
            .prune("p", Duration::from_secs(60), future)
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);

        let remaining = store.list("p").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].label, CheckpointLabel::BeforeUpdate);

        let next = store
            .write("p", CheckpointLabel::Manual, "r", BTreeMap::new(), None)
            .await
            .unwrap();
        assert_eq!(next.seq, 3);
    }

    #[tokio::test]
    async fn test_bundles_are_content_addressed() {
        let home = tempfile::tempdir().unwrap();
        let store = store(home.path());

        let staged = store.staging_path("p").await.unwrap();
        std::fs::write(&staged, b"bundle bytes").unwrap();
        let digest = store.store_bundle("p", &staged).await.unwrap();

        assert_eq!(digest, sha256_hash(b"bundle bytes"));
        assert!(store.bundle_path("p", &digest).exists());
        assert!(!staged.exists());

        // Unreferenced until a checkpoint records it
        assert_eq!(store.prune_bundles("p").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_heads_and_projects() {
        let home = tempfile::tempdir().unwrap();
        let store = store(home.path());
        store
            .write("a/b", CheckpointLabel::BeforeUpdate, "1", BTreeMap::new(), None)
            .await
            .unwrap();

        assert_eq!(store.projects().await.unwrap(), vec!["a/b".to_string()]);
        let heads = store.heads().await.unwrap();
        assert_eq!(heads[0].project, "a/b");
    }
}
