//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::locks::ProjectLocks;
use crate::app::options::AppOptions;
use crate::app::shutdown::ShutdownSignal;
use crate::cache::deploy::DeployCache;
use crate::deploy::compose::ContainerRuntime;
use crate::deploy::deployer::{ContainerDeployer, DeployOptions};
use crate::errors::SyncError;
use crate::registry::Registry;
use crate::rollback::engine::RollbackEngine;
use crate::storage::checkpoints::CheckpointStore;
use crate::storage::layout::StorageLayout;
use crate::storage::runs::RunHistory;
use crate::storage::settings::Settings;
use crate::sync::syncer::{GitSynchronizer, SyncOptions};

/// Main application state
pub struct AppState {
    pub layout: StorageLayout,

    /// Effective settings (file, then environment)
    pub settings: Settings,

    pub registry: Registry,

    pub store: CheckpointStore,

    pub deploy_cache: DeployCache,

    pub history: RunHistory,

    pub locks: ProjectLocks,

    pub shutdown: ShutdownSignal,
}

impl AppState {
    /// Load settings and the registry. With `options.init_config` the
    /// storage directories and a missing configuration file are created.
    pub async fn init(options: &AppOptions, shutdown: ShutdownSignal) -> Result<Self, SyncError> {
        info!("Loading configuration from {}", options.config_file.path().display());

        let mut settings = if options.init_config {
            options.layout.setup().await?;
            Settings::load_or_init(&options.config_file).await?
        } else {
            Settings::load(&options.config_file).await?
        };
        settings.apply_process_env()?;
        settings.warn_suspicious();

        let registry = Registry::load(&settings, &options.default_projects_root).await?;
        Ok(Self::from_parts(options.layout.clone(), settings, registry, shutdown))
    }

    pub fn from_parts(layout: StorageLayout, settings: Settings, registry: Registry, shutdown: ShutdownSignal) -> Self {
        Self {
            store: CheckpointStore::new(&layout),
            deploy_cache: DeployCache::new(layout.deploy_cache_dir()),
            history: RunHistory::new(layout.runs_file()),
            locks: ProjectLocks::new(),
            layout,
            settings,
            registry,
            shutdown,
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions::from_settings(&self.settings)
    }

    pub fn synchronizer(&self, force_push: bool) -> GitSynchronizer {
        let mut options = self.sync_options();
        options.force_push = force_push;
        GitSynchronizer::new(self.store.clone(), options, self.shutdown.clone())
    }

    pub fn deployer(&self, runtime: Arc<dyn ContainerRuntime>) -> Result<ContainerDeployer, SyncError> {
        ContainerDeployer::new(
            runtime,
            self.deploy_cache.clone(),
            DeployOptions::from_settings(&self.settings),
            self.shutdown.clone(),
        )
    }

    pub fn rollback_engine(&self, deployer: Option<Arc<ContainerDeployer>>) -> RollbackEngine {
        RollbackEngine::new(self.store.clone(), self.sync_options(), deployer, self.shutdown.clone())
    }
}
