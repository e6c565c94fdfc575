//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::SyncError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Environment variable that relocates the state directory
pub const HOME_ENV: &str = "FORKSYNC_HOME";

/// Storage layout for forksync state
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the configuration file path
    pub fn config_file(&self) -> File {
        File::new(self.base_dir.join("forksync.toml"))
    }

    /// Default destination of `export-config`
    pub fn template_file(&self) -> File {
        File::new(self.base_dir.join("forksync.template.toml"))
    }

    /// Process-wide lock file
    pub fn lock_file(&self) -> File {
        File::new(self.base_dir.join("forksync.lock"))
    }

    /// Run report history
    pub fn runs_file(&self) -> File {
        File::new(self.base_dir.join("runs.json"))
    }

    /// Per-project checkpoint ledgers
    pub fn checkpoints_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("checkpoints"))
    }

    /// Per-project repository bundles
    pub fn backups_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("backups"))
    }

    /// Get the cache directory
    pub fn cache_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("cache"))
    }

    /// Last successful deployment records
    pub fn deploy_cache_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("cache").join("deploy"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), SyncError> {
        self.checkpoints_dir().create().await?;
        self.backups_dir().create().await?;
        self.deploy_cache_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }

    /// Resolve the layout from an explicit path, `FORKSYNC_HOME`, or the default
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        explicit
            .or_else(|| std::env::var_os(HOME_ENV).map(PathBuf::from))
            .map(Self::new)
            .unwrap_or_default()
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".forksync");

        Self::new(base_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_under_base() {
        let layout = StorageLayout::new("/tmp/fs-home");
        assert_eq!(
            layout.config_file().path(),
            PathBuf::from("/tmp/fs-home/forksync.toml")
        );
        assert_eq!(
            layout.deploy_cache_dir().path(),
            PathBuf::from("/tmp/fs-home/cache/deploy")
        );
        assert!(layout.checkpoints_dir().path().starts_with("/tmp/fs-home"));
    }

    #[test]
    fn test_explicit_wins() {
        let layout = StorageLayout::resolve(Some(PathBuf::from("/srv/state")));
        assert_eq!(layout.base_dir, PathBuf::from("/srv/state"));
    }
}
