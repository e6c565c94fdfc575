//! Orchestrator
//!
//! Runs the sync and deploy pipeline for every selected project, one after
//! another or on a bounded pool, and aggregates one `UpdateRun` per
//! requested project into a `RunReport`.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::locks::ProjectLocks;
use crate::app::options::RunOptions;
use crate::app::shutdown::ShutdownSignal;
use crate::app::state::AppState;
use crate::deploy::compose::ContainerRuntime;
use crate::deploy::deployer::ContainerDeployer;
use crate::errors::SyncError;
use crate::models::checkpoint::CheckpointLabel;
use crate::models::run::{DeployOutcome, RunMode, RunReport, RunStatus, Stage, UpdateRun};
use crate::registry::project::Project;
use crate::registry::Selection;
use crate::rollback::engine::{RollbackEngine, RollbackTarget};
use crate::sync::syncer::GitSynchronizer;
use crate::utils::generate_uuid;

/// Everything one project's pipeline needs, shareable across tasks
struct Pipeline {
    run_id: String,
    synchronizer: GitSynchronizer,
    deployer: Option<Arc<ContainerDeployer>>,
    rollback: RollbackEngine,
    locks: ProjectLocks,
    skip_deploy: bool,
}

impl Pipeline {
    async fn update(&self, project: Project) -> UpdateRun {
        let name = project.name.clone();
        let _guard = self.locks.acquire(&name).await;
        let mut run = UpdateRun::new(&name);
        info!(project = %name, "Updating");

        if let Err(e) = self.synchronizer.sync(&project, &mut run, &self.run_id).await {
            let stage = run.stage;
            error!(project = %name, stage = %stage, "Update failed: {}", e);
            run.fail(stage, &e);
            if stage == Stage::PostHooks && matches!(e, SyncError::HookFailed { .. }) {
                self.undo(&project, &mut run).await;
            }
            return run.finish();
        }

        if project.deployment.is_some() {
            match &self.deployer {
                Some(deployer) if !self.skip_deploy => {
                    run.enter(Stage::Deploy);
                    match deployer.deploy(&project, &mut run, false).await {
                        Ok(outcome) => run.deploy = outcome,
                        Err(e) => {
                            error!(project = %name, "Deployment failed: {}", e);
                            run.fail_deploy(&e);
                        }
                    }
                }
                _ => run.deploy = DeployOutcome::Skipped,
            }
        }

        let run = run.finish();
        info!(project = %name, status = %run.status, "Update finished in {}ms", run.duration_ms);
        run
    }

    /// A required post hook failed after the push; restore the checkpoint
    /// this run started from.
    async fn undo(&self, project: &Project, run: &mut UpdateRun) {
        let Some(start) = run
            .checkpoints
            .iter()
            .find(|c| c.label == CheckpointLabel::BeforeUpdate)
            .map(|c| c.seq)
        else {
            return;
        };

        warn!(project = %project.name, "Required post hook failed, rolling back to #{}", start);
        if let Err(e) = self
            .rollback
            .rollback(project, RollbackTarget::Seq(start), false, run, &self.run_id)
            .await
        {
            error!(project = %project.name, "Automatic rollback failed: {}", e);
            run.event(format!("Automatic rollback failed: {}", e));
        }
    }
}

pub struct Orchestrator {
    state: Arc<AppState>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    options: RunOptions,
}

impl Orchestrator {
    /// `runtime` is only needed when a selected project deploys; without
    /// one, deployments are reported as skipped.
    pub fn new(state: Arc<AppState>, runtime: Option<Arc<dyn ContainerRuntime>>, options: RunOptions) -> Self {
        Self {
            state,
            runtime,
            options,
        }
    }

    fn pipeline(&self, run_id: &str) -> Result<Arc<Pipeline>, SyncError> {
        let deployer = match &self.runtime {
            Some(runtime) => Some(Arc::new(self.state.deployer(runtime.clone())?)),
            None => None,
        };
        Ok(Arc::new(Pipeline {
            run_id: run_id.to_string(),
            synchronizer: self.state.synchronizer(self.options.force_push),
            rollback: self.state.rollback_engine(deployer.clone()),
            deployer,
            locks: self.state.locks.clone(),
            skip_deploy: self.options.skip_deploy,
        }))
    }

    /// Update the selected projects. Every requested project gets a run in
    /// the report, in selection order.
    pub async fn update(&self, selector: Option<&str>) -> Result<RunReport, SyncError> {
        let run_id = generate_uuid();
        let started_at = Utc::now();
        let pipeline = self.pipeline(&run_id)?;
        let selections = self.state.registry.select(selector);
        info!(
            run_id = %run_id,
            "Updating {} projects ({:?})",
            selections.len(),
            self.options.mode
        );

        let runs = match self.options.mode {
            RunMode::Sequential => self.sequential(pipeline, selections).await,
            RunMode::Parallel => self.parallel(pipeline, selections).await,
        };

        let report = RunReport {
            run_id,
            command: "update".to_string(),
            mode: self.options.mode,
            started_at,
            finished_at: Utc::now(),
            runs,
        };
        self.record(&report).await;
        Ok(report)
    }

    async fn sequential(&self, pipeline: Arc<Pipeline>, selections: Vec<Selection>) -> Vec<UpdateRun> {
        let shutdown = &self.state.shutdown;
        let mut runs = Vec::with_capacity(selections.len());
        let mut aborted = false;

        for selection in selections {
            if aborted || shutdown.is_cancelled() {
                runs.push(UpdateRun::not_started(selection.name(), Stage::Preconditions, &SyncError::Cancelled));
                continue;
            }
            let run = match selection {
                Selection::Rejected(rejected) => {
                    UpdateRun::not_started(&rejected.name, Stage::Config, &rejected.error())
                }
                Selection::Ready(project) => pipeline.update(project).await,
            };
            if self.options.fail_fast && matches!(run.status, RunStatus::Failed | RunStatus::RolledBack) {
                warn!(project = %run.project, "Stopping batch after failure (fail-fast)");
                aborted = true;
            }
            runs.push(run);
        }
        runs
    }

    async fn parallel(&self, pipeline: Arc<Pipeline>, selections: Vec<Selection>) -> Vec<UpdateRun> {
        enum Slot {
            Done(UpdateRun),
            Running(String, JoinHandle<UpdateRun>),
        }

        let semaphore = Arc::new(Semaphore::new(self.options.max_workers.max(1)));
        let mut slots = Vec::with_capacity(selections.len());

        for selection in selections {
            match selection {
                Selection::Rejected(rejected) => slots.push(Slot::Done(UpdateRun::not_started(
                    &rejected.name,
                    Stage::Config,
                    &rejected.error(),
                ))),
                Selection::Ready(project) => {
                    let name = project.name.clone();
                    let pipeline = pipeline.clone();
                    let semaphore = semaphore.clone();
                    let shutdown: ShutdownSignal = self.state.shutdown.clone();
                    let handle = tokio::spawn(async move {
                        let permit = semaphore.acquire_owned().await;
                        if permit.is_err() || shutdown.is_cancelled() {
                            return UpdateRun::not_started(&project.name, Stage::Preconditions, &SyncError::Cancelled);
                        }
                        pipeline.update(project).await
                    });
                    slots.push(Slot::Running(name, handle));
                }
            }
        }

        // Joined in selection order, not completion order
        join_all(slots.into_iter().map(|slot| async move {
            match slot {
                Slot::Done(run) => run,
                Slot::Running(name, handle) => match handle.await {
                    Ok(run) => run,
                    Err(e) => {
                        error!(project = %name, "Pipeline task failed: {}", e);
                        let err = SyncError::Internal(format!("pipeline task failed: {}", e));
                        UpdateRun::not_started(&name, Stage::Preconditions, &err)
                    }
                },
            }
        }))
        .await
    }

    /// Roll back the selected projects one at a time
    pub async fn rollback(
        &self,
        selector: Option<&str>,
        target: RollbackTarget,
        force: bool,
    ) -> Result<RunReport, SyncError> {
        let run_id = generate_uuid();
        let started_at = Utc::now();
        let pipeline = self.pipeline(&run_id)?;
        let mut runs = Vec::new();

        for selection in self.state.registry.select(selector) {
            if self.state.shutdown.is_cancelled() {
                runs.push(UpdateRun::not_started(selection.name(), Stage::Rollback, &SyncError::Cancelled));
                continue;
            }
            let project = match selection {
                Selection::Rejected(rejected) => {
                    runs.push(UpdateRun::not_started(&rejected.name, Stage::Config, &rejected.error()));
                    continue;
                }
                Selection::Ready(project) => project,
            };

            let _guard = pipeline.locks.acquire(&project.name).await;
            let mut run = UpdateRun::new(&project.name);
            if let Err(e) = pipeline.rollback.rollback(&project, target, force, &mut run, &run_id).await {
                error!(project = %project.name, "Rollback failed: {}", e);
                run.fail(Stage::Rollback, &e);
            }
            runs.push(run.finish());
        }

        let report = RunReport {
            run_id,
            command: "rollback".to_string(),
            mode: RunMode::Sequential,
            started_at,
            finished_at: Utc::now(),
            runs,
        };
        self.record(&report).await;
        Ok(report)
    }

    async fn record(&self, report: &RunReport) {
        if let Err(e) = self.state.history.append(report).await {
            error!("Failed to record run report: {}", e);
        }
    }
}
