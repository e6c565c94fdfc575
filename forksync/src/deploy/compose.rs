//! Container runtime access through the compose CLI

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::errors::SyncError;
use crate::process::{Cmd, CmdOutput};
use crate::registry::project::{Deployment, Project};
use crate::storage::settings::{PruneScope, Settings};

/// Compose commands tried in order
const COMPOSE_COMMANDS: &[&[&str]] = &[&["docker", "compose"], &["docker-compose"], &["podman-compose"]];

/// Outcomes of start/stop that leave the service in the requested state
const BENIGN_PATTERNS: &[&str] = &[
    "already running",
    "already started",
    "already stopped",
    "is not running",
    "no such container",
    "no containers to",
];

/// What a compose operation acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeTarget {
    pub project_dir: PathBuf,
    pub compose_file: PathBuf,
    pub service: String,
}

impl ComposeTarget {
    pub fn new(project: &Project, deployment: &Deployment) -> Self {
        Self {
            project_dir: project.path.clone(),
            compose_file: deployment.compose_file.clone(),
            service: deployment.service.clone(),
        }
    }
}

/// Service state as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceHealth {
    Healthy,
    Starting,
    Unhealthy,
    Exited,
    Missing,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn is_available(&self) -> bool;

    /// Start the target detached, rebuilding images when `build` is set
    async fn up(&self, target: &ComposeTarget, build: bool) -> Result<(), SyncError>;

    async fn down(&self, target: &ComposeTarget) -> Result<(), SyncError>;

    async fn restart(&self, target: &ComposeTarget) -> Result<(), SyncError>;

    async fn service_health(&self, target: &ComposeTarget) -> Result<ServiceHealth, SyncError>;

    /// Image ids used by the compose project
    async fn project_images(&self, target: &ComposeTarget) -> Result<Vec<String>, SyncError>;

    /// Remove images; returns how many were removed
    async fn remove_images(&self, target: &ComposeTarget, images: &[String]) -> Result<usize, SyncError>;

    /// Prune dangling resources host-wide
    async fn prune(&self, scope: PruneScope) -> Result<(), SyncError>;
}

/// `ContainerRuntime` backed by `docker compose`, `docker-compose` or
/// `podman-compose`
#[derive(Debug, Clone)]
pub struct ComposeCli {
    command: Vec<String>,
    available: bool,
    timeout: Duration,
    remove_orphans: bool,
}

impl ComposeCli {
    pub fn new(command: Vec<String>, timeout: Duration, remove_orphans: bool) -> Self {
        Self {
            command,
            available: true,
            timeout,
            remove_orphans,
        }
    }

    /// Use the configured compose command, or detect the first one that works
    pub async fn detect(settings: &Settings) -> Self {
        let timeout = settings.docker_timeout();
        let remove_orphans = settings.docker.remove_orphans;
        if !settings.docker.compose_command.is_empty() {
            return Self::new(settings.docker.compose_command.clone(), timeout, remove_orphans);
        }

        let cwd = std::env::temp_dir();
        for candidate in COMPOSE_COMMANDS {
            let ok = Cmd::new(candidate[0], &cwd)
                .args(candidate[1..].iter().copied())
                .arg("version")
                .timeout(Duration::from_secs(30))
                .output()
                .await
                .map(|o| o.success())
                .unwrap_or(false);
            if ok {
                debug!("Using compose command: {}", candidate.join(" "));
                return Self::new(candidate.iter().map(|s| s.to_string()).collect(), timeout, remove_orphans);
            }
        }

        warn!("No compose command found (tried docker compose, docker-compose, podman-compose)");
        let mut cli = Self::new(vec!["docker".to_string(), "compose".to_string()], timeout, remove_orphans);
        cli.available = false;
        cli
    }

    pub fn command(&self) -> String {
        self.command.join(" ")
    }

    /// Engine binary for non-compose commands
    fn engine(&self) -> &str {
        if self.command.first().map(String::as_str) == Some("podman-compose") {
            "podman"
        } else {
            "docker"
        }
    }

    fn compose(&self, target: &ComposeTarget) -> Cmd {
        let (program, rest) = match self.command.split_first() {
            Some((program, rest)) => (program.as_str(), rest),
            None => ("docker", &[][..]),
        };
        Cmd::new(program, &target.project_dir)
            .args(rest.iter().cloned())
            .arg("-f")
            .arg(target.compose_file.display().to_string())
            .timeout(self.timeout)
    }

    async fn tolerant(&self, cmd: Cmd) -> Result<CmdOutput, SyncError> {
        let out = cmd.output().await?;
        if out.success() {
            return Ok(out);
        }
        let detail = out.combined().to_lowercase();
        if BENIGN_PATTERNS.iter().any(|p| detail.contains(p)) {
            debug!("Ignoring benign failure of `{}`: {}", cmd.display(), out.stderr);
            return Ok(out);
        }
        Err(SyncError::DeployError(format!(
            "`{}` failed: {}",
            cmd.display(),
            if out.stderr.is_empty() { out.stdout } else { out.stderr }
        )))
    }
}

#[async_trait]
impl ContainerRuntime for ComposeCli {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn up(&self, target: &ComposeTarget, build: bool) -> Result<(), SyncError> {
        let mut cmd = self.compose(target).args(["up", "-d"]);
        if build {
            cmd = cmd.arg("--build");
        }
        if self.remove_orphans {
            cmd = cmd.arg("--remove-orphans");
        }
        info!("Starting {} ({})", target.service, target.compose_file.display());
        self.tolerant(cmd).await.map(|_| ())
    }

    async fn down(&self, target: &ComposeTarget) -> Result<(), SyncError> {
        let mut cmd = self.compose(target).arg("down");
        if self.remove_orphans {
            cmd = cmd.arg("--remove-orphans");
        }
        self.tolerant(cmd).await.map(|_| ())
    }

    async fn restart(&self, target: &ComposeTarget) -> Result<(), SyncError> {
        let cmd = self.compose(target).args(["restart", target.service.as_str()]);
        self.tolerant(cmd).await.map(|_| ())
    }

    async fn service_health(&self, target: &ComposeTarget) -> Result<ServiceHealth, SyncError> {
        let out = self
            .compose(target)
            .args(["ps", "-a", "--format", "json"])
            .checked()
            .await
            .map_err(|e| SyncError::DeployError(e.to_string()))?;
        Ok(parse_ps(&out.stdout, &target.service))
    }

    async fn project_images(&self, target: &ComposeTarget) -> Result<Vec<String>, SyncError> {
        let out = self
            .compose(target)
            .args(["images", "-q"])
            .checked()
            .await
            .map_err(|e| SyncError::DeployError(e.to_string()))?;
        let mut images: Vec<String> = out.stdout.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect();
        images.sort();
        images.dedup();
        Ok(images)
    }

    async fn remove_images(&self, target: &ComposeTarget, images: &[String]) -> Result<usize, SyncError> {
        if images.is_empty() {
            return Ok(0);
        }
        let cmd = Cmd::new(self.engine(), &target.project_dir)
            .args(["rmi", "-f"])
            .args(images.iter().cloned())
            .timeout(self.timeout);
        self.tolerant(cmd).await?;
        Ok(images.len())
    }

    async fn prune(&self, scope: PruneScope) -> Result<(), SyncError> {
        if scope != PruneScope::Global {
            return Ok(());
        }
        let cwd = std::env::temp_dir();
        for kind in ["image", "container", "network"] {
            let cmd = Cmd::new(self.engine(), &cwd)
                .args([kind, "prune", "-f"])
                .timeout(self.timeout);
            self.tolerant(cmd).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "Service", default)]
    service: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Health", default)]
    health: String,
}

/// Interpret `compose ps --format json`, which is a JSON array on some
/// versions and one object per line on others.
pub fn parse_ps(output: &str, service: &str) -> ServiceHealth {
    let trimmed = output.trim();
    let entries: Vec<PsEntry> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).unwrap_or_default()
    } else {
        trimmed
            .lines()
            .filter_map(|line| serde_json::from_str(line.trim()).ok())
            .collect()
    };

    let Some(entry) = entries.iter().find(|e| e.service == service) else {
        return ServiceHealth::Missing;
    };

    match (entry.state.to_lowercase().as_str(), entry.health.to_lowercase().as_str()) {
        ("running", "" | "healthy") => ServiceHealth::Healthy,
        ("running", "starting") | ("restarting", _) | ("created", _) => ServiceHealth::Starting,
        ("running", _) => ServiceHealth::Unhealthy,
        ("exited" | "dead", _) => ServiceHealth::Exited,
        _ => ServiceHealth::Unhealthy,
    }
}

/// Compose file that exists on disk, for early failure
pub async fn require_compose_file(path: &Path) -> Result<(), SyncError> {
    match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() => Ok(()),
        _ => Err(SyncError::DeployError(format!(
            "Compose file not found: {}",
            path.display()
        ))),
    }
}
