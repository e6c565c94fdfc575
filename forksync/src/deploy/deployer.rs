//! Container deployment
//!
//! Rebuilds and restarts a project's compose service after its sources
//! changed, then polls health. Failures here never touch git state; they are
//! reported on the run separately from the sync outcome.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::app::shutdown::ShutdownSignal;
use crate::cache::deploy::{DeployCache, DeployRecord};
use crate::deploy::compose::{require_compose_file, ComposeTarget, ContainerRuntime};
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm};
use crate::deploy::health::{HealthProber, PollTiming};
use crate::errors::SyncError;
use crate::models::run::{DeployOutcome, UpdateRun};
use crate::registry::project::{Deployment, Project, RestartPolicy};
use crate::storage::settings::Settings;
use crate::sync::git::GitCli;
use crate::utils::hex;

/// Files besides the compose file whose contents affect the built images
const FINGERPRINT_FILES: &[&str] = &["Dockerfile", ".env", "docker-compose.override.yml"];

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub skip_unchanged: bool,
    pub verify_health: bool,
    pub rebuild_on_config_change: bool,
    pub timing: PollTiming,
}

impl DeployOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            skip_unchanged: settings.general.skip_unchanged_deploy,
            verify_health: settings.general.verify_health,
            rebuild_on_config_change: settings.docker.rebuild_on_config_change,
            timing: PollTiming::from_settings(settings),
        }
    }
}

pub struct ContainerDeployer {
    runtime: Arc<dyn ContainerRuntime>,
    prober: HealthProber,
    cache: DeployCache,
    options: DeployOptions,
    shutdown: ShutdownSignal,
}

impl ContainerDeployer {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        cache: DeployCache,
        options: DeployOptions,
        shutdown: ShutdownSignal,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            prober: HealthProber::new(runtime.clone())?,
            runtime,
            cache,
            options,
            shutdown,
        })
    }

    pub fn cache(&self) -> &DeployCache {
        &self.cache
    }

    /// Deploy the project's current checkout. `force` skips the unchanged
    /// shortcut. Restart cycles and notable steps are recorded on `run`.
    pub async fn deploy(&self, project: &Project, run: &mut UpdateRun, force: bool) -> Result<DeployOutcome, SyncError> {
        let Some(deployment) = &project.deployment else {
            return Ok(DeployOutcome::NotApplicable);
        };

        self.deploy_inner(project, deployment, run, force)
            .await
            .map_err(|e| match e {
                SyncError::DeployError(_) | SyncError::Cancelled => e,
                other => SyncError::DeployError(other.to_string()),
            })
    }

    async fn deploy_inner(
        &self,
        project: &Project,
        deployment: &Deployment,
        run: &mut UpdateRun,
        force: bool,
    ) -> Result<DeployOutcome, SyncError> {
        let name = project.name.as_str();
        let target = ComposeTarget::new(project, deployment);

        require_compose_file(&deployment.compose_file).await?;
        if !self.runtime.is_available().await {
            return Err(SyncError::DeployError("No container runtime available".to_string()));
        }

        let fingerprint = fingerprint(project, deployment).await;
        let revision = GitCli::new(&project.path).head().await.unwrap_or_default();
        let cached = self.cache.get(name).await?;
        let changed = cached.as_ref().map_or(true, |c| c.fingerprint != fingerprint);

        let mut fsm = DeploymentFsm::new();
        if !force && self.options.skip_unchanged && !changed {
            match self.prober.probe(deployment, &target).await {
                Ok(()) => {
                    transition(&mut fsm, DeploymentEvent::Skip)?;
                    info!(project = %name, "Deployment unchanged and healthy");
                    run.event("Deployment unchanged and healthy, not rebuilt");
                    return Ok(DeployOutcome::Unchanged);
                }
                Err(reason) => {
                    run.event(format!("Deployment unchanged but unhealthy ({}), rebuilding", reason));
                }
            }
        }

        transition(&mut fsm, DeploymentEvent::Build)?;
        let purge = changed && cached.is_some() && self.options.rebuild_on_config_change;
        if let Err(e) = self.rebuild(&target, purge, run).await {
            let _ = fsm.process(DeploymentEvent::BuildFailed(e.to_string()));
            return Err(e);
        }
        transition(&mut fsm, DeploymentEvent::Built)?;

        if !self.options.verify_health {
            transition(&mut fsm, DeploymentEvent::ProbeSucceeded)?;
            run.event("Health verification disabled");
        }

        let max_restarts = match deployment.restart_policy {
            RestartPolicy::Never => 0,
            _ => deployment.max_restart_attempts,
        };
        while self.options.verify_health {
            let poll = self
                .prober
                .poll(deployment, &target, self.options.timing, &self.shutdown)
                .await?;
            if poll.healthy {
                transition(&mut fsm, DeploymentEvent::ProbeSucceeded)?;
                break;
            }

            transition(&mut fsm, DeploymentEvent::ProbeTimedOut)?;
            let reason = poll.last_failure.unwrap_or_else(|| "no successful probe".to_string());
            run.event(format!("{} unhealthy after {} probes: {}", target.service, poll.probes, reason));

            if !fsm.can_retry(max_restarts) {
                let message = format!(
                    "{} unhealthy after {} restart cycles: {}",
                    target.service,
                    fsm.restart_count(),
                    reason
                );
                transition(&mut fsm, DeploymentEvent::GiveUp(message.clone()))?;
                return Err(SyncError::DeployError(message));
            }

            transition(&mut fsm, DeploymentEvent::Restart)?;
            run.restart_cycles = fsm.restart_count();
            warn!(project = %name, "Restart cycle {} of {}", fsm.restart_count(), max_restarts);
            run.event(format!("Restart cycle {} of {} ({:?})", fsm.restart_count(), max_restarts, deployment.restart_policy));

            let restarted = match deployment.restart_policy {
                RestartPolicy::Restart => self.runtime.restart(&target).await,
                _ => self.recreate(&target).await,
            };
            if let Err(e) = restarted {
                let _ = fsm.process(DeploymentEvent::BuildFailed(e.to_string()));
                return Err(e);
            }
            transition(&mut fsm, DeploymentEvent::Restarted)?;
        }

        let record = DeployRecord {
            fingerprint,
            revision,
            deployed_at: Utc::now(),
        };
        self.cache.put(name, &record).await?;
        info!(project = %name, "Deployment healthy");
        Ok(DeployOutcome::Healthy)
    }

    async fn rebuild(&self, target: &ComposeTarget, purge: bool, run: &mut UpdateRun) -> Result<(), SyncError> {
        self.runtime.down(target).await?;
        if purge {
            let images = self.runtime.project_images(target).await?;
            let removed = self.runtime.remove_images(target, &images).await?;
            if removed > 0 {
                run.event(format!("Configuration changed, removed {} images", removed));
            }
        }
        self.runtime.up(target, true).await
    }

    async fn recreate(&self, target: &ComposeTarget) -> Result<(), SyncError> {
        self.runtime.down(target).await?;
        self.runtime.up(target, true).await
    }
}

/// SHA-256 over the HEAD tree id and the build-relevant files that exist
pub async fn fingerprint(project: &Project, deployment: &Deployment) -> String {
    let mut hasher = Sha256::new();
    match GitCli::new(&project.path).tree_id().await {
        Ok(tree) => {
            hasher.update(b"tree\0");
            hasher.update(tree.as_bytes());
        }
        Err(e) => debug!(project = %project.name, "No tree id for fingerprint: {}", e),
    }

    let mut files: Vec<PathBuf> = vec![deployment.compose_file.clone()];
    files.extend(FINGERPRINT_FILES.iter().map(|f| project.path.join(f)));
    for path in files {
        if let Ok(bytes) = tokio::fs::read(&path).await {
            hasher.update(path.to_string_lossy().as_bytes());
            hasher.update(b"\0");
            hasher.update(&bytes);
        }
    }
    hex::encode(hasher.finalize())
}

fn transition(fsm: &mut DeploymentFsm, event: DeploymentEvent) -> Result<(), SyncError> {
    fsm.process(event).map_err(SyncError::Internal)
}
