//! Git synchronization pipeline
//!
//! Drives one project from its current state to "upstream merged and pushed
//! to origin", writing a checkpoint after every stage that succeeds. The
//! caller holds the project's lock for the whole call.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::app::shutdown::ShutdownSignal;
use crate::errors::SyncError;
use crate::filesys::file::File;
use crate::models::checkpoint::{Checkpoint, CheckpointLabel};
use crate::models::run::{GitOutcome, Stage, UpdateRun};
use crate::registry::project::{HookPhase, Project};
use crate::storage::checkpoints::CheckpointStore;
use crate::storage::settings::{NetworkSettings, Settings};
use crate::sync::git::{GitCli, MergeOutcome, RemoteChange, UnmergedPath};
use crate::sync::hooks;
use crate::sync::state::{SyncEvent, SyncFsm};
use crate::utils::{retry, RetryPolicy};

const UPSTREAM: &str = "upstream";
const ORIGIN: &str = "origin";
const MAX_LISTED_PATHS: usize = 10;

/// Synchronizer settings
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub auto_merge_conflicts: bool,
    pub force_push: bool,
    pub safe_merge_only: bool,
    pub backup_before_update: bool,
    pub git_timeout: Duration,
    pub hook_timeout: Duration,
    pub network: NetworkSettings,
    pub retry: RetryPolicy,
}

impl SyncOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            auto_merge_conflicts: settings.general.auto_merge_conflicts,
            force_push: settings.general.force_push,
            safe_merge_only: settings.general.safe_merge_only,
            backup_before_update: settings.general.backup_before_update,
            git_timeout: settings.git_timeout(),
            hook_timeout: settings.hook_timeout(),
            network: settings.network.clone(),
            retry: settings.network_retry(),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Build the git wrapper for a project
pub fn git_for(project: &Project, options: &SyncOptions) -> GitCli {
    GitCli::new(&project.path)
        .with_timeout(options.git_timeout)
        .with_network(&options.network)
}

pub struct GitSynchronizer {
    store: CheckpointStore,
    options: SyncOptions,
    shutdown: ShutdownSignal,
}

impl GitSynchronizer {
    pub fn new(store: CheckpointStore, options: SyncOptions, shutdown: ShutdownSignal) -> Self {
        Self {
            store,
            options,
            shutdown,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Run the pipeline for `project`. Progress, checkpoints and events are
    /// recorded on `run`; on error `run.stage` is the stage that failed.
    pub async fn sync(&self, project: &Project, run: &mut UpdateRun, run_id: &str) -> Result<(), SyncError> {
        run.enter(Stage::Preconditions);
        let origin = project.require_origin()?.to_string();
        let git = git_for(project, &self.options);

        if !git.is_repository().await {
            return Err(SyncError::ConfigError(format!(
                "{} is not a git repository",
                project.path.display()
            )));
        }

        let dirty = git.dirty_files().await?;
        if !dirty.is_empty() && (!project.auto_stash || self.options.safe_merge_only) {
            return Err(SyncError::DirtyWorkingTree {
                project: project.name.clone(),
                files: dirty,
            });
        }

        let current = git.current_branch().await?;
        if current != project.branch {
            if !dirty.is_empty() {
                return Err(SyncError::ConfigError(format!(
                    "{} is on {} with uncommitted changes, expected branch {}",
                    project.path.display(),
                    current,
                    project.branch
                )));
            }
            git.checkout(&project.branch).await.map_err(|e| {
                SyncError::ConfigError(format!("Cannot switch to branch {}: {}", project.branch, e))
            })?;
            warn!(project = %project.name, "Switched from {} to {}", current, project.branch);
            run.event(format!("Switched from {} to branch {}", current, project.branch));
        }
        self.shutdown.check()?;

        run.enter(Stage::BeforeUpdate);
        let before = git.head().await?;
        run.before_revision = Some(before.clone());
        let bundle = if self.options.backup_before_update {
            Some(self.backup(project, &git).await?)
        } else {
            None
        };
        self.checkpoint(project, run, CheckpointLabel::BeforeUpdate, &before, run_id, BTreeMap::new(), bundle)
            .await?;

        let mut fsm = SyncFsm::new();
        let mut stashed = false;
        let result = self
            .pipeline(project, &git, &origin, run, run_id, &mut fsm, !dirty.is_empty(), &mut stashed)
            .await;

        if let Err(e) = &result {
            let _ = fsm.process(SyncEvent::Fail(e.to_string()));
            self.clean_up(project, &git, stashed).await;
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn pipeline(
        &self,
        project: &Project,
        git: &GitCli,
        origin: &str,
        run: &mut UpdateRun,
        run_id: &str,
        fsm: &mut SyncFsm,
        dirty: bool,
        stashed: &mut bool,
    ) -> Result<(), SyncError> {
        let name = project.name.as_str();

        run.enter(Stage::PreHooks);
        self.run_hooks(project, HookPhase::Pre, run).await?;
        self.shutdown.check()?;

        // RemoteVerified
        run.enter(Stage::RemoteSetup);
        for (remote, url) in [(UPSTREAM, project.upstream_url.as_str()), (ORIGIN, origin)] {
            match git.ensure_remote(remote, url).await? {
                RemoteChange::Unchanged => {}
                RemoteChange::Added => run.event(format!("Added remote {} -> {}", remote, url)),
                RemoteChange::Updated { previous } => {
                    warn!(project = %name, "Remote {} pointed at {}, corrected to {}", remote, previous, url);
                    run.event(format!("Corrected remote {}: {} -> {}", remote, previous, url));
                }
            }
        }
        if let RemoteChange::Updated { previous } = git.ensure_push_url(ORIGIN, origin).await? {
            warn!(project = %name, "Pushes to {} went to {}, corrected to {}", ORIGIN, previous, origin);
            run.event(format!("Corrected push URL of {}: {} -> {}", ORIGIN, previous, origin));
        }
        transition(fsm, SyncEvent::RemotesVerified)?;
        let head = git.head().await?;
        self.checkpoint(project, run, CheckpointLabel::AfterRemoteSetup, &head, run_id, BTreeMap::new(), None)
            .await?;
        self.shutdown.check()?;

        if dirty {
            *stashed = git.stash(&format!("forksync auto-stash {}", run_id)).await?;
            if *stashed {
                run.event("Stashed uncommitted changes");
            }
        }

        // Fetched
        run.enter(Stage::Fetch);
        info!(project = %name, "Fetching {}", UPSTREAM);
        retry(
            &self.options.retry,
            |e| matches!(e, SyncError::NetworkError(_)),
            |_| git.fetch(UPSTREAM),
        )
        .await?;
        transition(fsm, SyncEvent::Fetched)?;
        let stash_meta = BTreeMap::from([("stashed".to_string(), json!(*stashed))]);
        self.checkpoint(project, run, CheckpointLabel::AfterFetch, &head, run_id, stash_meta, None)
            .await?;
        self.shutdown.check()?;

        // Merged
        run.enter(Stage::Merge);
        let target = format!("{}/{}", UPSTREAM, project.branch);
        if !git.has_commit(&target).await {
            return Err(SyncError::ConfigError(format!(
                "Upstream has no branch {}",
                project.branch
            )));
        }
        let mut resolved = Vec::new();
        match git.merge(&target).await? {
            MergeOutcome::UpToDate => {
                info!(project = %name, "Already up to date with {}", target);
                transition(fsm, SyncEvent::MergeClean)?;
            }
            MergeOutcome::Merged => transition(fsm, SyncEvent::MergeClean)?,
            MergeOutcome::Conflicted(paths) => {
                transition(
                    fsm,
                    SyncEvent::Conflicts(paths.iter().map(|p| p.path.clone()).collect()),
                )?;
                resolved = self.resolve_conflicts(git, &paths).await?;
                run.event(format!(
                    "Resolved {} conflicts with the upstream version: {}",
                    resolved.len(),
                    resolved.join(", ")
                ));
                transition(fsm, SyncEvent::ConflictsResolved)?;
            }
        }

        let after = git.head().await?;
        let changed = git.changed_files(&head, &after).await?;
        run.files_changed = changed.len();
        run.after_revision = Some(after.clone());
        let merge_meta = BTreeMap::from([
            ("files_changed".to_string(), json!(changed.len())),
            (
                "changed_paths".to_string(),
                json!(changed.iter().take(MAX_LISTED_PATHS).collect::<Vec<_>>()),
            ),
            ("conflicts_resolved".to_string(), json!(resolved)),
        ]);
        self.checkpoint(project, run, CheckpointLabel::AfterMerge, &after, run_id, merge_meta, None)
            .await?;

        if *stashed {
            match git.stash_pop().await {
                Ok(()) => run.event("Re-applied stashed changes"),
                Err(e) => {
                    warn!(project = %name, "Stashed changes kept in the stash: {}", e);
                    run.event(format!("Could not re-apply stash, changes kept in `git stash list`: {}", e));
                }
            }
            *stashed = false;
        }
        self.shutdown.check()?;

        // Pushed
        run.enter(Stage::Push);
        info!(project = %name, "Pushing {} to {}", project.branch, ORIGIN);
        let force = self.options.force_push;
        retry(
            &self.options.retry,
            |e| matches!(e, SyncError::NetworkError(_)),
            |_| git.push(ORIGIN, &project.branch, force),
        )
        .await?;
        transition(fsm, SyncEvent::Pushed)?;
        run.git = GitOutcome::Pushed;
        let push_meta = BTreeMap::from([
            ("forced".to_string(), json!(force)),
            ("deployment_rebuilt".to_string(), json!("pending")),
        ]);
        self.checkpoint(project, run, CheckpointLabel::AfterPush, &after, run_id, push_meta, None)
            .await?;

        run.enter(Stage::PostHooks);
        self.run_hooks(project, HookPhase::Post, run).await?;
        transition(fsm, SyncEvent::Completed)?;

        info!(project = %name, "Synchronized {} files", changed.len());
        Ok(())
    }

    async fn run_hooks(&self, project: &Project, phase: HookPhase, run: &mut UpdateRun) -> Result<(), SyncError> {
        let failures = hooks::run_phase(project, phase, self.options.hook_timeout).await?;
        for failure in failures {
            run.degraded = true;
            run.event(failure.to_string());
        }
        Ok(())
    }

    /// Apply the conflict policy. Only both-sides content conflicts on text
    /// files are resolved, by taking the upstream version; anything else
    /// needs a human.
    async fn resolve_conflicts(&self, git: &GitCli, paths: &[UnmergedPath]) -> Result<Vec<String>, SyncError> {
        let all: Vec<String> = paths.iter().map(|p| p.path.clone()).collect();
        if !self.options.auto_merge_conflicts {
            return Err(SyncError::MergeConflict { files: all });
        }

        let mut manual = Vec::new();
        for path in paths {
            let text = match (&path.theirs, path.is_content_conflict()) {
                (Some(object), true) => git.is_text_blob(object).await?,
                _ => false,
            };
            if !text {
                manual.push(path.path.clone());
            }
        }
        if !manual.is_empty() {
            return Err(SyncError::MergeConflict { files: manual });
        }

        for path in paths {
            git.take_theirs(&path.path).await?;
        }
        git.commit_merge().await?;
        Ok(all)
    }

    async fn backup(&self, project: &Project, git: &GitCli) -> Result<String, SyncError> {
        let staged = self.store.staging_path(&project.name).await?;
        if let Err(e) = git.bundle_create(&staged).await {
            let _ = File::new(&staged).delete().await;
            return Err(e);
        }
        self.store.store_bundle(&project.name, &staged).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn checkpoint(
        &self,
        project: &Project,
        run: &mut UpdateRun,
        label: CheckpointLabel,
        revision: &str,
        run_id: &str,
        mut metadata: BTreeMap<String, Value>,
        bundle: Option<String>,
    ) -> Result<Checkpoint, SyncError> {
        metadata.insert("branch".to_string(), json!(project.branch));
        metadata.insert("run_id".to_string(), json!(run_id));
        let checkpoint = self
            .store
            .write(&project.name, label, revision, metadata, bundle)
            .await?;
        run.record_checkpoint(&checkpoint);
        Ok(checkpoint)
    }

    /// Leave the working tree at the last checkpoint's revision
    async fn clean_up(&self, project: &Project, git: &GitCli, stashed: bool) {
        if let Err(e) = git.abort_merge().await {
            error!(project = %project.name, "Failed to abort merge: {}", e);
        }
        if stashed {
            if let Err(e) = git.stash_pop().await {
                error!(project = %project.name, "Failed to restore stashed changes: {}", e);
            }
        }
    }
}

fn transition(fsm: &mut SyncFsm, event: SyncEvent) -> Result<(), SyncError> {
    fsm.process(event).map(|_| ()).map_err(SyncError::Internal)
}
