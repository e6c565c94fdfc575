//! Built-in projects and on-disk detection

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::registry::project::{HealthCheck, RestartPolicy};

/// Compose file names tried, in order, when a deployment does not name one
pub const COMPOSE_CANDIDATES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
    "docker-compose.prod.yml",
    "docker-compose.production.yml",
];

/// Deployment defaults of a built-in project
#[derive(Debug, Clone)]
pub struct BuiltinDeployment {
    pub service: &'static str,
    pub port: u16,
    pub restart_policy: RestartPolicy,
    pub max_restart_attempts: u32,
}

impl BuiltinDeployment {
    pub fn health_check(&self) -> HealthCheck {
        HealthCheck::Tcp {
            host: "127.0.0.1".to_string(),
            port: Some(self.port),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuiltinProject {
    pub name: &'static str,
    pub upstream_url: &'static str,
    pub aliases: &'static [&'static str],
    pub deployment: Option<BuiltinDeployment>,
}

pub fn builtin_projects() -> Vec<BuiltinProject> {
    vec![
        BuiltinProject {
            name: "VCPChat",
            upstream_url: "https://github.com/lioensky/VCPChat.git",
            aliases: &["chat", "vcpchat"],
            deployment: None,
        },
        BuiltinProject {
            name: "VCPToolBox",
            upstream_url: "https://github.com/lioensky/VCPToolBox.git",
            aliases: &["toolbox", "tb", "vcptoolbox"],
            deployment: Some(BuiltinDeployment {
                service: "vcptoolbox",
                port: 3210,
                restart_policy: RestartPolicy::Recreate,
                max_restart_attempts: 2,
            }),
        },
    ]
}

/// Directory names a checkout of `name` is commonly found under
pub fn candidate_dirs(name: &str) -> Vec<String> {
    let lower = name.to_lowercase();
    vec![
        format!("{}-main", name),
        name.to_string(),
        format!("{}-main", lower),
        lower.clone(),
        format!("{}-master", name),
        format!("{}-master", lower),
        format!("{}-dev", name),
        format!("{}-dev", lower),
    ]
}

/// Find the checkout of `name` under `root`, preferring git repositories
/// over plain directories.
pub async fn detect_project_dir(root: &Path, name: &str) -> Option<PathBuf> {
    let candidates: Vec<PathBuf> = candidate_dirs(name).iter().map(|c| root.join(c)).collect();

    for path in &candidates {
        if is_dir(path).await && fs::metadata(path.join(".git")).await.is_ok() {
            return Some(path.clone());
        }
    }
    for path in &candidates {
        if is_dir(path).await {
            return Some(path.clone());
        }
    }
    None
}

/// First existing compose file in `project_dir`
pub async fn detect_compose_file(project_dir: &Path) -> Option<PathBuf> {
    for name in COMPOSE_CANDIDATES {
        let path = project_dir.join(name);
        if fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
            return Some(path);
        }
    }
    None
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}
