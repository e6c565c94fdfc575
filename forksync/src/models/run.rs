//! Update run and run report models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, SyncError};
use crate::models::checkpoint::{Checkpoint, CheckpointLabel};

/// Final status of one project in one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    PartialFailure,
    Failed,
    RolledBack,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Pipeline stage, used to attribute events and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Config,
    Preconditions,
    BeforeUpdate,
    PreHooks,
    RemoteSetup,
    Fetch,
    Merge,
    Push,
    PostHooks,
    Deploy,
    Rollback,
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&s)
    }
}

/// Outcome of the version-control half of the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitOutcome {
    #[default]
    NotStarted,
    Failed,
    Pushed,
    RolledBack,
}

/// Outcome of the container half of the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployOutcome {
    /// The project has no deployment
    #[default]
    NotApplicable,
    /// Not attempted (`--skip-deploy`, or git did not reach Pushed)
    Skipped,
    /// Sources unchanged and the service healthy; nothing rebuilt
    Unchanged,
    Healthy,
    Failed,
}

/// An error attributed to a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub stage: Stage,
    pub message: String,
}

impl RunError {
    pub fn new(stage: Stage, err: &SyncError) -> Self {
        Self {
            kind: err.kind(),
            stage,
            message: err.to_string(),
        }
    }
}

/// Something worth telling the operator that is not an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    pub at: DateTime<Utc>,
    pub stage: Stage,
    pub message: String,
}

/// Reference to a checkpoint written during the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub seq: u64,
    pub label: CheckpointLabel,
    pub revision: String,
}

impl From<&Checkpoint> for CheckpointRef {
    fn from(c: &Checkpoint) -> Self {
        Self {
            seq: c.seq,
            label: c.label,
            revision: c.revision.clone(),
        }
    }
}

/// One project's result in one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRun {
    pub project: String,
    pub status: RunStatus,

    /// Last stage reached; the failing stage when the run failed
    pub stage: Stage,

    pub git: GitOutcome,
    pub deploy: DeployOutcome,

    /// Checkpoints written by this run, in order
    #[serde(default)]
    pub checkpoints: Vec<CheckpointRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,

    /// Deployment failures are kept apart from git failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_error: Option<RunError>,

    #[serde(default)]
    pub events: Vec<RunEvent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_revision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_revision: Option<String>,

    #[serde(default)]
    pub files_changed: usize,

    #[serde(default)]
    pub restart_cycles: u32,

    /// A non-required hook failed
    #[serde(default)]
    pub degraded: bool,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub duration_ms: u64,
}

impl UpdateRun {
    pub fn new(project: &str) -> Self {
        Self {
            project: project.to_string(),
            status: RunStatus::Failed,
            stage: Stage::Preconditions,
            git: GitOutcome::NotStarted,
            deploy: DeployOutcome::NotApplicable,
            checkpoints: Vec::new(),
            error: None,
            deploy_error: None,
            events: Vec::new(),
            before_revision: None,
            after_revision: None,
            files_changed: 0,
            restart_cycles: 0,
            degraded: false,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
        }
    }

    /// A project that never started, failed at `stage` with `err`
    pub fn not_started(project: &str, stage: Stage, err: &SyncError) -> Self {
        let mut run = Self::new(project);
        run.fail(stage, err);
        run.finish()
    }

    pub fn enter(&mut self, stage: Stage) {
        self.stage = stage;
    }

    pub fn event(&mut self, message: impl Into<String>) {
        self.events.push(RunEvent {
            at: Utc::now(),
            stage: self.stage,
            message: message.into(),
        });
    }

    pub fn record_checkpoint(&mut self, checkpoint: &Checkpoint) {
        self.checkpoints.push(checkpoint.into());
    }

    pub fn fail(&mut self, stage: Stage, err: &SyncError) {
        self.stage = stage;
        if self.git != GitOutcome::Pushed && self.git != GitOutcome::RolledBack {
            self.git = GitOutcome::Failed;
        }
        self.error = Some(RunError::new(stage, err));
    }

    pub fn fail_deploy(&mut self, err: &SyncError) {
        self.deploy = DeployOutcome::Failed;
        self.deploy_error = Some(RunError::new(Stage::Deploy, err));
    }

    /// Latest checkpoint written by this run
    pub fn reached(&self) -> Option<&CheckpointRef> {
        self.checkpoints.last()
    }

    /// Labels written by this run, in order
    pub fn labels(&self) -> Vec<CheckpointLabel> {
        self.checkpoints.iter().map(|c| c.label).collect()
    }

    /// Derive the final status and stamp the finish time
    pub fn finish(mut self) -> Self {
        self.status = match self.git {
            GitOutcome::RolledBack => RunStatus::RolledBack,
            GitOutcome::Pushed if self.error.is_some() => RunStatus::Failed,
            GitOutcome::Pushed if self.deploy == DeployOutcome::Failed || self.degraded => {
                RunStatus::PartialFailure
            }
            GitOutcome::Pushed => RunStatus::Success,
            GitOutcome::NotStarted | GitOutcome::Failed => RunStatus::Failed,
        };
        if self.status == RunStatus::Success {
            self.stage = Stage::Done;
        }
        let finished_at = Utc::now();
        self.duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(finished_at);
        self
    }
}

/// How projects were scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Sequential,
    Parallel,
}

/// Aggregated result of one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub command: String,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub runs: Vec<UpdateRun>,
}

impl RunReport {
    /// True when every project ended with `expected`
    pub fn all(&self, expected: RunStatus) -> bool {
        self.runs.iter().all(|r| r.status == expected)
    }

    pub fn all_succeeded(&self) -> bool {
        self.all(RunStatus::Success)
    }

    pub fn run(&self, project: &str) -> Option<&UpdateRun> {
        self.runs.iter().find(|r| r.project == project)
    }

    pub fn count(&self, status: RunStatus) -> usize {
        self.runs.iter().filter(|r| r.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let mut run = UpdateRun::new("p");
        run.git = GitOutcome::Pushed;
        run.deploy = DeployOutcome::Unchanged;
        let run = run.finish();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.stage, Stage::Done);

        let mut run = UpdateRun::new("p");
        run.git = GitOutcome::Pushed;
        run.fail_deploy(&SyncError::DeployError("unhealthy".into()));
        assert_eq!(run.finish().status, RunStatus::PartialFailure);

        let mut run = UpdateRun::new("p");
        run.git = GitOutcome::Pushed;
        run.degraded = true;
        assert_eq!(run.finish().status, RunStatus::PartialFailure);

        let mut run = UpdateRun::new("p");
        run.fail(Stage::Push, &SyncError::PushRejected("non-fast-forward".into()));
        let run = run.finish();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_ref().unwrap().kind, ErrorKind::PushRejectedError);
        assert_eq!(run.stage, Stage::Push);
    }

    #[test]
    fn test_not_started() {
        let run = UpdateRun::not_started("x", Stage::Config, &SyncError::ConfigError("bad".into()));
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.git, GitOutcome::Failed);
        assert!(run.checkpoints.is_empty());
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::PostHooks.to_string(), "post_hooks");
    }
}
