//! Restoring a project to a checkpoint

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::app::shutdown::ShutdownSignal;
use crate::deploy::deployer::ContainerDeployer;
use crate::errors::SyncError;
use crate::models::checkpoint::{Checkpoint, CheckpointLabel};
use crate::models::run::{DeployOutcome, GitOutcome, Stage, UpdateRun};
use crate::registry::project::Project;
use crate::storage::checkpoints::CheckpointStore;
use crate::sync::git::GitCli;
use crate::sync::syncer::{git_for, SyncOptions};

/// Which checkpoint to restore
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RollbackTarget {
    /// Latest `before_update`
    #[default]
    LatestBeforeUpdate,
    Label(CheckpointLabel),
    Seq(u64),
}

impl FromStr for RollbackTarget {
    type Err = String;

    /// `before_update`, `after-merge`, `12` or `#12`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(seq) = trimmed.trim_start_matches('#').parse::<u64>() {
            return Ok(RollbackTarget::Seq(seq));
        }
        CheckpointLabel::from_str(trimmed).map(RollbackTarget::Label)
    }
}

pub struct RollbackEngine {
    store: CheckpointStore,
    options: SyncOptions,
    deployer: Option<Arc<ContainerDeployer>>,
    shutdown: ShutdownSignal,
}

impl RollbackEngine {
    pub fn new(
        store: CheckpointStore,
        options: SyncOptions,
        deployer: Option<Arc<ContainerDeployer>>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            store,
            options,
            deployer,
            shutdown,
        }
    }

    /// Resolve the checkpoint a rollback would restore
    pub async fn resolve(&self, project: &str, target: RollbackTarget) -> Result<Checkpoint, SyncError> {
        let checkpoint = match target {
            RollbackTarget::LatestBeforeUpdate => self.store.get(project, CheckpointLabel::BeforeUpdate).await?,
            RollbackTarget::Label(label) => self.store.get(project, label).await?,
            RollbackTarget::Seq(seq) => self.store.get_seq(project, seq).await?,
        };
        if checkpoint.label == CheckpointLabel::AfterRollback {
            return Err(SyncError::InvalidRollbackTarget(format!(
                "#{} is an after_rollback checkpoint; choose the checkpoint it restored instead",
                checkpoint.seq
            )));
        }
        Ok(checkpoint)
    }

    /// Restore `project` to `target`. Without `force`, uncommitted changes
    /// make the rollback fail instead of being discarded.
    ///
    /// Rolling back to the checkpoint the project was already reverted to,
    /// with HEAD still there, changes nothing.
    pub async fn rollback(
        &self,
        project: &Project,
        target: RollbackTarget,
        force: bool,
        run: &mut UpdateRun,
        run_id: &str,
    ) -> Result<Checkpoint, SyncError> {
        run.enter(Stage::Rollback);
        self.shutdown.check()?;
        let name = project.name.as_str();
        let checkpoint = self.resolve(name, target).await?;
        let git = git_for(project, &self.options);

        if !git.is_repository().await {
            return Err(SyncError::ConfigError(format!(
                "{} is not a git repository",
                project.path.display()
            )));
        }

        let dirty = git.dirty_files().await?;
        if !dirty.is_empty() && !force {
            return Err(SyncError::RollbackConflict {
                project: name.to_string(),
                files: dirty,
            });
        }

        let ledger = self.store.ledger(name).await?;
        let head = git.head().await.ok();
        run.before_revision = head.clone();
        let already_there = ledger.reverted_to == Some(checkpoint.seq)
            && head.as_deref() == Some(checkpoint.revision.as_str())
            && dirty.is_empty();

        if already_there {
            info!(project = %name, "Already at checkpoint #{}", checkpoint.seq);
            run.event(format!(
                "Already at checkpoint #{} ({}), nothing restored",
                checkpoint.seq, checkpoint.label
            ));
        } else {
            self.restore(project, &git, &checkpoint, !dirty.is_empty()).await?;

            let metadata = BTreeMap::from([
                ("restored_seq".to_string(), json!(checkpoint.seq)),
                ("restored_label".to_string(), json!(checkpoint.label)),
                ("restored_revision".to_string(), json!(checkpoint.revision)),
                ("branch".to_string(), json!(branch_of(project, &checkpoint))),
                ("run_id".to_string(), json!(run_id)),
            ]);
            let written = self
                .store
                .write(name, CheckpointLabel::AfterRollback, &checkpoint.revision, metadata, None)
                .await?;
            self.store.mark_reverted(name, checkpoint.seq).await?;
            run.record_checkpoint(&written);
            info!(
                project = %name,
                "Rolled back to #{} {} ({})",
                checkpoint.seq,
                checkpoint.label,
                checkpoint.short_revision()
            );
        }

        run.git = GitOutcome::RolledBack;
        run.after_revision = Some(checkpoint.revision.clone());
        self.redeploy(project, &checkpoint, run).await;
        Ok(checkpoint)
    }

    async fn restore(&self, project: &Project, git: &GitCli, checkpoint: &Checkpoint, dirty: bool) -> Result<(), SyncError> {
        let name = project.name.as_str();

        if !git.has_commit(&checkpoint.revision).await {
            let bundle = self.store.nearest_bundle(name, checkpoint.seq).await?;
            let Some(bundle) = bundle else {
                return Err(SyncError::InvalidRollbackTarget(format!(
                    "revision {} is missing and no backup bundle exists",
                    checkpoint.short_revision()
                )));
            };
            warn!(project = %name, "Restoring objects from {}", bundle.display());
            git.bundle_unbundle(&bundle).await?;
            if !git.has_commit(&checkpoint.revision).await {
                return Err(SyncError::InvalidRollbackTarget(format!(
                    "revision {} is not in the backup bundle",
                    checkpoint.short_revision()
                )));
            }
        }

        if dirty {
            git.reset_hard("HEAD").await?;
        }
        git.abort_merge().await?;

        let branch = branch_of(project, checkpoint);
        if git.current_branch().await.ok().as_deref() != Some(branch.as_str()) {
            git.checkout(&branch).await?;
        }
        git.reset_hard(&checkpoint.revision).await
    }

    /// Bring the running deployment in line with the restored revision
    async fn redeploy(&self, project: &Project, checkpoint: &Checkpoint, run: &mut UpdateRun) {
        let Some(deployer) = &self.deployer else {
            return;
        };
        if project.deployment.is_none() {
            return;
        }

        let current = match deployer.cache().get(&project.name).await {
            Ok(record) => record,
            Err(e) => {
                warn!(project = %project.name, "Unreadable deploy cache: {}", e);
                None
            }
        };
        if current.map(|r| r.revision) == Some(checkpoint.revision.clone()) {
            run.deploy = DeployOutcome::Unchanged;
            return;
        }

        run.enter(Stage::Deploy);
        match deployer.deploy(project, run, true).await {
            Ok(outcome) => run.deploy = outcome,
            Err(e) => {
                warn!(project = %project.name, "Redeploy after rollback failed: {}", e);
                run.fail_deploy(&e);
            }
        }
        run.enter(Stage::Rollback);
    }
}

fn branch_of(project: &Project, checkpoint: &Checkpoint) -> String {
    checkpoint
        .metadata
        .get("branch")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| project.branch.clone())
}
