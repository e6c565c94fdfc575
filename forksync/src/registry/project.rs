//! Project and deployment descriptors

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::SyncError;

/// When a hook runs relative to the git pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    /// Before the remotes are verified
    Pre,
    /// After a successful push
    Post,
}

/// A shell command run in the project directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    pub phase: HookPhase,
    pub command: String,

    /// A failing required hook fails the run instead of degrading it
    #[serde(default)]
    pub required: bool,
}

/// How service readiness is decided
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HealthCheck {
    /// Connect to `host:port`; the port defaults to the deployment's port
    Tcp {
        #[serde(default = "default_probe_host")]
        host: String,
        #[serde(default)]
        port: Option<u16>,
    },
    /// GET the URL; any 2xx or 3xx response is healthy
    Http { url: String },
    /// Trust the state reported by the container runtime
    Container,
}

fn default_probe_host() -> String {
    "127.0.0.1".to_string()
}

/// What a failed health check is allowed to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    /// down, then up --build
    #[default]
    Recreate,
    /// compose restart of the service
    Restart,
    /// no restart cycles
    Never,
}

/// Deployment section as written in the configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentEntry {
    #[serde(default)]
    pub compose_file: Option<PathBuf>,

    #[serde(default)]
    pub service: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub health_check: Option<HealthCheck>,

    #[serde(default)]
    pub restart_policy: RestartPolicy,

    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
}

fn default_max_restart_attempts() -> u32 {
    2
}

/// A `[[projects]]` entry as written in the configuration document.
///
/// Every field is optional here so that one malformed entry can be rejected
/// without failing the whole document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectEntry {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub upstream_url: Option<String>,

    #[serde(default)]
    pub origin_url: Option<String>,

    #[serde(default)]
    pub branch: Option<String>,

    #[serde(default)]
    pub auto_stash: bool,

    #[serde(default)]
    pub aliases: Vec<String>,

    #[serde(default)]
    pub hooks: Vec<Hook>,

    #[serde(default)]
    pub deployment: Option<DeploymentEntry>,
}

/// A resolved container deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deployment {
    /// Absolute path of the compose file
    pub compose_file: PathBuf,
    pub service: String,
    pub port: Option<u16>,
    pub health_check: HealthCheck,
    pub restart_policy: RestartPolicy,
    pub max_restart_attempts: u32,
}

/// A project managed by forksync. Immutable for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
    pub upstream_url: String,
    pub origin_url: Option<String>,
    pub branch: String,
    pub auto_stash: bool,
    pub aliases: Vec<String>,
    pub hooks: Vec<Hook>,
    pub deployment: Option<Deployment>,
    pub builtin: bool,
}

impl Project {
    /// The fork URL, required before any mutating operation
    pub fn require_origin(&self) -> Result<&str, SyncError> {
        self.origin_url.as_deref().ok_or_else(|| {
            SyncError::ConfigError(format!(
                "No origin URL configured for {}; set [origins].{} or origin_url",
                self.name, self.name
            ))
        })
    }

    /// Case-insensitive match against the name and aliases
    pub fn matches(&self, key: &str) -> bool {
        self.name.eq_ignore_ascii_case(key) || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(key))
    }

    pub fn hooks(&self, phase: HookPhase) -> impl Iterator<Item = &Hook> {
        self.hooks.iter().filter(move |h| h.phase == phase)
    }
}

/// Normalize a remote URL for equality checks
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    trimmed.to_lowercase()
}

/// Placeholder values shipped in the template count as unset
pub fn is_placeholder_url(url: &str) -> bool {
    let url = url.trim();
    url.is_empty() || url.contains("YOUR_USERNAME")
}
