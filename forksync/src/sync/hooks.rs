//! Pre/post hook execution

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::errors::SyncError;
use crate::process::Cmd;
use crate::registry::project::{Hook, HookPhase, Project};

/// Run one hook with `sh -c` in `dir`
pub async fn run_hook(hook: &Hook, dir: &Path, timeout: Duration) -> Result<(), SyncError> {
    let result = Cmd::new("sh", dir)
        .args(["-c", hook.command.as_str()])
        .timeout(timeout)
        .output()
        .await;

    let reason = match result {
        Ok(out) if out.success() => return Ok(()),
        Ok(out) => {
            let detail = if out.stderr.is_empty() { out.stdout } else { out.stderr };
            match out.code {
                Some(code) => format!("exit code {}: {}", code, detail),
                None => format!("terminated by signal: {}", detail),
            }
        }
        Err(SyncError::Timeout { timeout, .. }) => format!("timed out after {:?}", timeout),
        Err(e) => e.to_string(),
    };

    Err(SyncError::HookFailed {
        command: hook.command.clone(),
        reason,
    })
}

/// Run every hook of `phase` in declaration order.
///
/// A failing required hook stops the phase and is returned as the error.
/// Failures of optional hooks are collected and returned on success.
pub async fn run_phase(
    project: &Project,
    phase: HookPhase,
    timeout: Duration,
) -> Result<Vec<SyncError>, SyncError> {
    let mut failures = Vec::new();

    for hook in project.hooks(phase) {
        info!(project = %project.name, "Running {:?} hook: {}", phase, hook.command);
        match run_hook(hook, &project.path, timeout).await {
            Ok(()) => {}
            Err(e) if hook.required => return Err(e),
            Err(e) => {
                warn!(project = %project.name, "Optional hook failed: {}", e);
                failures.push(e);
            }
        }
    }
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(dir: &Path, hooks: Vec<Hook>) -> Project {
        Project {
            name: "p".to_string(),
            path: dir.to_path_buf(),
            upstream_url: "u".to_string(),
            origin_url: None,
            branch: "main".to_string(),
            auto_stash: false,
            aliases: Vec::new(),
            hooks,
            deployment: None,
            builtin: false,
        }
    }

    fn hook(phase: HookPhase, command: &str, required: bool) -> Hook {
        Hook {
            phase,
            command: command.to_string(),
            required,
        }
    }

    #[tokio::test]
    async fn test_hook_runs_in_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(dir.path(), vec![hook(HookPhase::Pre, "touch marker", true)]);

        let failures = run_phase(&p, HookPhase::Pre, Duration::from_secs(10)).await.unwrap();
        assert!(failures.is_empty());
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_optional_failures_are_collected() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(
            dir.path(),
            vec![
                hook(HookPhase::Post, "exit 4", false),
                hook(HookPhase::Post, "true", true),
                hook(HookPhase::Pre, "exit 1", true),
            ],
        );

        let failures = run_phase(&p, HookPhase::Post, Duration::from_secs(10)).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].to_string().contains("exit code 4"));
    }

    #[tokio::test]
    async fn test_required_failure_stops_phase() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(
            dir.path(),
            vec![
                hook(HookPhase::Pre, "exit 1", true),
                hook(HookPhase::Pre, "touch never", false),
            ],
        );

        let result = run_phase(&p, HookPhase::Pre, Duration::from_secs(10)).await;
        assert!(matches!(result, Err(SyncError::HookFailed { .. })));
        assert!(!dir.path().join("never").exists());
    }
}
