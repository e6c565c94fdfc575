//! Cleanup of aged checkpoints, unreferenced backups, old logs and unused
//! container resources

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::app::state::AppState;
use crate::deploy::compose::{ComposeTarget, ContainerRuntime};
use crate::errors::SyncError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::logs::LOG_FILE_PREFIX;
use crate::storage::settings::PruneScope;

/// What one cleanup removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub checkpoints_removed: usize,
    pub bundles_removed: usize,
    pub logs_removed: usize,
    pub images_removed: usize,
    pub container_prune: bool,

    /// Failures that did not stop the remaining work
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn removed_anything(&self) -> bool {
        self.checkpoints_removed + self.bundles_removed + self.logs_removed + self.images_removed > 0
    }
}

/// Run every cleanup job. Safe to repeat; the latest `before_update`
/// checkpoint of each project is always kept.
pub async fn cleanup(
    state: &AppState,
    runtime: Option<&dyn ContainerRuntime>,
    now: DateTime<Utc>,
) -> Result<CleanupReport, SyncError> {
    let mut report = CleanupReport::default();
    let retention = state.settings.retention();

    for project in state.store.projects().await? {
        let _guard = state.locks.acquire(&project).await;
        let removed = state.store.prune(&project, retention, now).await?;
        report.checkpoints_removed += removed.len();
        report.bundles_removed += state.store.prune_bundles(&project).await?;
    }

    report.logs_removed = trim_logs(&state.layout.logs_dir(), state.settings.logging.max_log_files).await?;

    if state.settings.docker.auto_prune {
        match runtime {
            Some(runtime) if runtime.is_available().await => {
                prune_containers(state, runtime, &mut report).await;
            }
            _ => report.errors.push("auto_prune is on but no container runtime is available".to_string()),
        }
    }

    info!(
        "Cleanup removed {} checkpoints, {} bundles, {} log files, {} images (retention {:?})",
        report.checkpoints_removed,
        report.bundles_removed,
        report.logs_removed,
        report.images_removed,
        retention
    );
    Ok(report)
}

/// Keep the newest `max_files` log files; 0 keeps everything
pub async fn trim_logs(dir: &Dir, max_files: usize) -> Result<usize, SyncError> {
    if max_files == 0 {
        return Ok(0);
    }

    // daily files sort by their date suffix
    let logs: Vec<_> = dir
        .list_files()
        .await?
        .into_iter()
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with(LOG_FILE_PREFIX))
                .unwrap_or(false)
        })
        .collect();

    let excess = logs.len().saturating_sub(max_files);
    for path in &logs[..excess] {
        File::new(path).delete().await?;
    }
    Ok(excess)
}

async fn prune_containers(state: &AppState, runtime: &dyn ContainerRuntime, report: &mut CleanupReport) {
    match state.settings.docker.prune_scope {
        PruneScope::Global => match runtime.prune(PruneScope::Global).await {
            Ok(()) => report.container_prune = true,
            Err(e) => report.errors.push(e.to_string()),
        },
        PruneScope::Project => {
            for project in state.registry.all() {
                let Some(deployment) = &project.deployment else {
                    continue;
                };
                let target = ComposeTarget::new(project, deployment);
                let removed = match runtime.project_images(&target).await {
                    Ok(images) => runtime.remove_images(&target, &images).await,
                    Err(e) => Err(e),
                };
                match removed {
                    Ok(count) => report.images_removed += count,
                    Err(e) => {
                        warn!(project = %project.name, "Image cleanup failed: {}", e);
                        report.errors.push(format!("{}: {}", project.name, e));
                    }
                }
            }
            report.container_prune = true;
        }
    }
}
