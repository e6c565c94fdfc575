//! Configuration document management
//!
//! Values are resolved in order of precedence: explicit CLI flag, then
//! environment variable, then the configuration file, then the built-in
//! default. Flags are applied by the command layer after [`Settings::apply_env`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::SyncError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::registry::project::ProjectEntry;
use crate::storage::template::CONFIG_TEMPLATE;
use crate::utils::RetryPolicy;

/// The configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub timeouts: TimeoutSettings,

    #[serde(default)]
    pub docker: DockerSettings,

    #[serde(default)]
    pub performance: PerformanceSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub network: NetworkSettings,

    /// Fork URLs of built-in projects, keyed by project name
    #[serde(default)]
    pub origins: BTreeMap<String, String>,

    /// Upstream overrides of built-in projects, keyed by project name
    #[serde(default)]
    pub upstreams: BTreeMap<String, String>,

    /// User-defined projects
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
}

/// Update policy switches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Resolve merge conflicts by taking the upstream version
    pub auto_merge_conflicts: bool,

    /// Push with --force-with-lease
    pub force_push: bool,

    /// Refuse to update a dirty working tree even when auto_stash is set
    pub safe_merge_only: bool,

    /// Take a bundle backup at before_update
    pub backup_before_update: bool,

    /// Skip container rebuilds when the source fingerprint is unchanged
    pub skip_unchanged_deploy: bool,

    /// Probe service health after deployment
    pub verify_health: bool,

    /// Retention for checkpoints and bundles
    pub max_backup_age_days: u64,

    /// Register the built-in projects that are found on disk
    pub include_builtin_projects: bool,

    /// Base directory for relative project paths (defaults to the state directory's parent)
    pub projects_root: Option<PathBuf>,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            auto_merge_conflicts: true,
            force_push: false,
            safe_merge_only: false,
            backup_before_update: true,
            skip_unchanged_deploy: true,
            verify_health: true,
            max_backup_age_days: 30,
            include_builtin_projects: true,
            projects_root: None,
        }
    }
}

/// Timeouts and retry tunables, all in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub git_timeout_secs: u64,
    pub docker_timeout_secs: u64,
    pub health_check_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    pub wait_before_health_check_secs: u64,
    pub hook_timeout_secs: u64,
    pub network_retry_count: u32,
    pub network_retry_delay_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            git_timeout_secs: 180,
            docker_timeout_secs: 900,
            health_check_timeout_secs: 60,
            health_check_interval_secs: 5,
            wait_before_health_check_secs: 10,
            hook_timeout_secs: 300,
            network_retry_count: 3,
            network_retry_delay_secs: 5,
        }
    }
}

/// Which container resources `cleanup` may prune
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PruneScope {
    /// Only images built for registered deployments
    #[default]
    Project,
    /// Every dangling image, container and network on the host
    Global,
}

/// Container runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    pub remove_orphans: bool,
    pub auto_prune: bool,
    pub prune_scope: PruneScope,
    pub rebuild_on_config_change: bool,

    /// Explicit compose command, e.g. ["docker", "compose"]; detected when empty
    pub compose_command: Vec<String>,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            remove_orphans: true,
            auto_prune: false,
            prune_scope: PruneScope::Project,
            rebuild_on_config_change: true,
            compose_command: Vec::new(),
        }
    }
}

/// Scheduling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    pub max_workers: usize,
    pub parallel: bool,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            parallel: true,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_level: LogLevel,
    pub max_log_files: usize,
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            max_log_files: 30,
            json_format: false,
        }
    }
}

/// Proxy and TLS settings applied to git child processes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
    pub ssl_verify: bool,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            http_proxy: String::new(),
            https_proxy: String::new(),
            no_proxy: "localhost,127.0.0.1".to_string(),
            ssl_verify: true,
        }
    }
}

impl NetworkSettings {
    /// Environment for child processes that talk to remotes
    pub fn child_env(&self) -> Vec<(String, String)> {
        let mut envs = Vec::new();
        if !self.http_proxy.is_empty() {
            envs.push(("http_proxy".to_string(), self.http_proxy.clone()));
            envs.push(("HTTP_PROXY".to_string(), self.http_proxy.clone()));
        }
        if !self.https_proxy.is_empty() {
            envs.push(("https_proxy".to_string(), self.https_proxy.clone()));
            envs.push(("HTTPS_PROXY".to_string(), self.https_proxy.clone()));
        }
        if !envs.is_empty() && !self.no_proxy.is_empty() {
            envs.push(("no_proxy".to_string(), self.no_proxy.clone()));
            envs.push(("NO_PROXY".to_string(), self.no_proxy.clone()));
        }
        envs
    }
}

impl Settings {
    /// Parse a configuration document
    pub fn from_toml(contents: &str) -> Result<Self, SyncError> {
        Ok(toml::from_str(contents)?)
    }

    /// Read the configuration file. A missing file yields the defaults and
    /// nothing is written.
    pub async fn load(file: &File) -> Result<Self, SyncError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        let settings: Settings = file.read_toml().await.map_err(|e| {
            SyncError::ConfigError(format!("{}: {}", file.path().display(), e))
        })?;
        Ok(settings)
    }

    /// Read the configuration file, writing the commented template first
    /// when none exists yet.
    pub async fn load_or_init(file: &File) -> Result<Self, SyncError> {
        if !file.exists().await {
            file.write_string(CONFIG_TEMPLATE).await?;
            info!("Created default configuration: {}", file.path().display());
        }
        Self::load(file).await
    }

    /// Apply environment overrides through an injectable lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SyncError> {
            value.trim().parse().map_err(|_| {
                SyncError::ConfigError(format!("Invalid value for {}: {:?}", key, value))
            })
        }

        if let Some(v) = lookup("FORKSYNC_GIT_TIMEOUT") {
            self.timeouts.git_timeout_secs = parse("FORKSYNC_GIT_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("FORKSYNC_DOCKER_TIMEOUT") {
            self.timeouts.docker_timeout_secs = parse("FORKSYNC_DOCKER_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("FORKSYNC_HEALTH_TIMEOUT") {
            self.timeouts.health_check_timeout_secs = parse("FORKSYNC_HEALTH_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("FORKSYNC_MAX_WORKERS") {
            self.performance.max_workers = parse("FORKSYNC_MAX_WORKERS", &v)?;
        }
        if let Some(v) = lookup("FORKSYNC_LOG_LEVEL") {
            self.logging.log_level = v.parse().map_err(SyncError::ConfigError)?;
        }
        if let Some(v) = lookup("FORKSYNC_HTTP_PROXY") {
            self.network.http_proxy = v;
        }
        if let Some(v) = lookup("FORKSYNC_HTTPS_PROXY") {
            self.network.https_proxy = v;
        }
        if let Some(v) = lookup("FORKSYNC_NO_PROXY") {
            self.network.no_proxy = v;
        }
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_process_env(&mut self) -> Result<(), SyncError> {
        self.apply_env(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Log values that are accepted but probably wrong
    pub fn warn_suspicious(&self) {
        let timeouts = [
            ("git_timeout_secs", self.timeouts.git_timeout_secs),
            ("docker_timeout_secs", self.timeouts.docker_timeout_secs),
            ("health_check_timeout_secs", self.timeouts.health_check_timeout_secs),
        ];
        for (key, value) in timeouts {
            if !(10..=3600).contains(&value) {
                warn!("Timeout {}={} looks unreasonable (expected 10-3600 seconds)", key, value);
            }
        }
        if self.performance.max_workers == 0 {
            warn!("max_workers=0, using 1 worker");
        }
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.git_timeout_secs)
    }

    pub fn docker_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.docker_timeout_secs)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.hook_timeout_secs)
    }

    pub fn max_workers(&self) -> usize {
        self.performance.max_workers.max(1)
    }

    /// Retry policy for fetch and push
    pub fn network_retry(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.timeouts.network_retry_count,
            Duration::from_secs(self.timeouts.network_retry_delay_secs),
        )
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.general.max_backup_age_days * 24 * 60 * 60)
    }
}
