//! Project registry
//!
//! Built-in projects found on disk plus the `[[projects]]` entries of the
//! configuration document. Loading is lenient per entry: a malformed entry is
//! kept as a [`RejectedProject`] so that it still shows up in reports.

pub mod builtin;
pub mod project;

use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::SyncError;
use crate::registry::builtin::{builtin_projects, detect_compose_file, detect_project_dir, BuiltinProject};
use crate::registry::project::{
    is_placeholder_url, normalize_url, Deployment, DeploymentEntry, HealthCheck, Project, ProjectEntry,
};
use crate::storage::checkpoints::ledger_dir_name;
use crate::storage::settings::Settings;

/// A configured project that could not be registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedProject {
    pub name: String,
    pub reason: String,
}

impl RejectedProject {
    pub fn error(&self) -> SyncError {
        SyncError::ConfigError(format!("{}: {}", self.name, self.reason))
    }
}

/// One requested project, registered or not
#[derive(Debug, Clone)]
pub enum Selection {
    Ready(Project),
    Rejected(RejectedProject),
}

impl Selection {
    pub fn name(&self) -> &str {
        match self {
            Selection::Ready(p) => &p.name,
            Selection::Rejected(r) => &r.name,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    projects: Vec<Project>,
    rejected: Vec<RejectedProject>,
}

impl Registry {
    /// Build the registry from the configuration document. Relative project
    /// paths resolve against `general.projects_root`, or `default_root` when
    /// that is unset.
    pub async fn load(settings: &Settings, default_root: &Path) -> Result<Self, SyncError> {
        let root = match &settings.general.projects_root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => default_root.join(root),
            None => default_root.to_path_buf(),
        };

        let mut registry = Registry::default();

        if settings.general.include_builtin_projects {
            for builtin in builtin_projects() {
                match detect_project_dir(&root, builtin.name).await {
                    Some(path) => {
                        let project = build_builtin(&builtin, path, settings).await;
                        registry.admit(project, true);
                    }
                    None => debug!("Built-in project {} not found under {}", builtin.name, root.display()),
                }
            }
        }

        for (index, entry) in settings.projects.iter().enumerate() {
            match build_entry(entry, &root).await {
                Ok(project) => registry.admit(project, false),
                Err(reason) => {
                    let name = entry
                        .name
                        .clone()
                        .filter(|n| !n.trim().is_empty())
                        .unwrap_or_else(|| format!("projects[{}]", index));
                    warn!("Rejected project {}: {}", name, reason);
                    registry.rejected.push(RejectedProject { name, reason });
                }
            }
        }

        Ok(registry)
    }

    /// Build a registry from already resolved projects
    pub fn from_projects(projects: Vec<Project>) -> Self {
        let mut registry = Registry::default();
        for project in projects {
            registry.admit(project, false);
        }
        registry
    }

    fn admit(&mut self, project: Project, builtin: bool) {
        let reject = |registry: &mut Registry, reason: String| {
            warn!("Rejected project {}: {}", project.name, reason);
            registry.rejected.push(RejectedProject {
                name: project.name.clone(),
                reason,
            });
        };

        if let Some(origin) = &project.origin_url {
            if normalize_url(origin) == normalize_url(&project.upstream_url) {
                return reject(self, "upstream and origin URLs are identical".to_string());
            }
        }

        // A user project replaces the built-in of the same name
        if !builtin {
            self.projects
                .retain(|p| !(p.builtin && p.name.eq_ignore_ascii_case(&project.name)));
        }

        let path = normalize_path(&project.path);
        let ledger_dir = ledger_dir_name(&project.name);
        let keys = std::iter::once(&project.name).chain(project.aliases.iter());
        let name_clash = keys
            .filter_map(|key| self.projects.iter().find(|p| p.matches(key)).map(|p| (key, p)))
            .next()
            .map(|(key, existing)| format!("{} collides with project {}", key, existing.name));
        let collision = name_clash
            .or_else(|| {
                self.projects
                    .iter()
                    .find(|p| normalize_path(&p.path) == path)
                    .map(|existing| {
                        format!("path {} is already used by {}", project.path.display(), existing.name)
                    })
            })
            .or_else(|| {
                self.projects
                    .iter()
                    .find(|p| ledger_dir_name(&p.name) == ledger_dir)
                    .map(|existing| format!("checkpoint directory {} is already used by {}", ledger_dir, existing.name))
            });
        if let Some(reason) = collision {
            return reject(self, reason);
        }

        self.projects.push(project);
    }

    pub fn all(&self) -> &[Project] {
        &self.projects
    }

    pub fn rejected(&self) -> &[RejectedProject] {
        &self.rejected
    }

    /// Look up a project by case-insensitive name or alias
    pub fn resolve(&self, key: &str) -> Result<&Project, SyncError> {
        if let Some(project) = self.projects.iter().find(|p| p.name.eq_ignore_ascii_case(key)) {
            return Ok(project);
        }
        if let Some(project) = self.projects.iter().find(|p| p.matches(key)) {
            return Ok(project);
        }
        if let Some(rejected) = self.rejected.iter().find(|r| r.name.eq_ignore_ascii_case(key)) {
            return Err(rejected.error());
        }
        Err(SyncError::ConfigError(format!("Unknown project: {}", key)))
    }

    /// Expand a `--project` selector. `None` and `all` select every project,
    /// rejected entries included. Unknown names become rejected selections.
    pub fn select(&self, selector: Option<&str>) -> Vec<Selection> {
        match selector {
            None => self.select_all(),
            Some(key) if key.eq_ignore_ascii_case("all") => self.select_all(),
            Some(key) => match self.resolve(key) {
                Ok(project) => vec![Selection::Ready(project.clone())],
                Err(e) => vec![Selection::Rejected(
                    self.rejected
                        .iter()
                        .find(|r| r.name.eq_ignore_ascii_case(key))
                        .cloned()
                        .unwrap_or_else(|| RejectedProject {
                            name: key.to_string(),
                            reason: e.to_string(),
                        }),
                )],
            },
        }
    }

    fn select_all(&self) -> Vec<Selection> {
        self.projects
            .iter()
            .cloned()
            .map(Selection::Ready)
            .chain(self.rejected.iter().cloned().map(Selection::Rejected))
            .collect()
    }

    /// Strict validation: the first rejected entry is an error
    pub fn validate(&self) -> Result<(), SyncError> {
        match self.rejected.first() {
            Some(rejected) => Err(rejected.error()),
            None => Ok(()),
        }
    }
}

async fn build_builtin(builtin: &BuiltinProject, path: PathBuf, settings: &Settings) -> Project {
    let origin_url = settings
        .origins
        .get(builtin.name)
        .filter(|url| !is_placeholder_url(url))
        .cloned();
    let upstream_url = settings
        .upstreams
        .get(builtin.name)
        .filter(|url| !url.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| builtin.upstream_url.to_string());

    let deployment = match &builtin.deployment {
        Some(d) => Some(Deployment {
            compose_file: compose_file_or_default(&path).await,
            service: d.service.to_string(),
            port: Some(d.port),
            health_check: d.health_check(),
            restart_policy: d.restart_policy,
            max_restart_attempts: d.max_restart_attempts,
        }),
        None => None,
    };

    Project {
        name: builtin.name.to_string(),
        path,
        upstream_url,
        origin_url,
        branch: "main".to_string(),
        auto_stash: false,
        aliases: builtin.aliases.iter().map(|a| a.to_string()).collect(),
        hooks: Vec::new(),
        deployment,
        builtin: true,
    }
}

async fn build_entry(entry: &ProjectEntry, root: &Path) -> Result<Project, String> {
    let name = required(&entry.name, "name")?;
    let path = entry
        .path
        .clone()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| "missing required field 'path'".to_string())?;
    let upstream_url = required(&entry.upstream_url, "upstream_url")?;
    let path = if path.is_absolute() { path } else { root.join(path) };

    let deployment = match &entry.deployment {
        Some(d) => Some(build_deployment(d, &name, &path).await?),
        None => None,
    };

    Ok(Project {
        name,
        path,
        upstream_url,
        origin_url: entry.origin_url.clone().filter(|u| !is_placeholder_url(u)),
        branch: entry
            .branch
            .clone()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| "main".to_string()),
        auto_stash: entry.auto_stash,
        aliases: entry.aliases.clone(),
        hooks: entry.hooks.clone(),
        deployment,
        builtin: false,
    })
}

async fn build_deployment(entry: &DeploymentEntry, name: &str, path: &Path) -> Result<Deployment, String> {
    let compose_file = match &entry.compose_file {
        Some(file) if file.is_absolute() => file.clone(),
        Some(file) => path.join(file),
        None => compose_file_or_default(path).await,
    };

    let health_check = match entry.health_check.clone() {
        Some(HealthCheck::Tcp { host, port }) => {
            let port = port
                .or(entry.port)
                .ok_or_else(|| "tcp health check needs a port".to_string())?;
            HealthCheck::Tcp { host, port: Some(port) }
        }
        Some(check) => check,
        None => match entry.port {
            Some(port) => HealthCheck::Tcp {
                host: "127.0.0.1".to_string(),
                port: Some(port),
            },
            None => HealthCheck::Container,
        },
    };

    Ok(Deployment {
        compose_file,
        service: entry
            .service
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| name.to_lowercase()),
        port: entry.port,
        health_check,
        restart_policy: entry.restart_policy,
        max_restart_attempts: entry.max_restart_attempts,
    })
}

async fn compose_file_or_default(path: &Path) -> PathBuf {
    detect_compose_file(path)
        .await
        .unwrap_or_else(|| path.join("docker-compose.yml"))
}

fn required(value: &Option<String>, field: &str) -> Result<String, String> {
    value
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("missing required field '{}'", field))
}

/// Lexical normalization, enough to catch `a/b` vs `a/./b/`
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}
