//! Subcommand implementations
//!
//! Each command returns whether it fully succeeded; `main` maps that to the
//! exit code.

pub mod checkpoints;
pub mod cleanup;
pub mod export_config;
pub mod output;
pub mod rollback;
pub mod status;
pub mod update;

use std::path::PathBuf;
use std::sync::Arc;

use crate::app::options::AppOptions;
use crate::app::shutdown::ShutdownSignal;
use crate::app::state::AppState;
use crate::deploy::compose::{ComposeCli, ContainerRuntime};
use crate::errors::SyncError;
use crate::filesys::file::File;
use crate::storage::layout::StorageLayout;

/// What every command needs from `main`
#[derive(Debug, Clone)]
pub struct Context {
    pub layout: StorageLayout,
    pub config_file: File,
    pub projects_root: PathBuf,
    pub shutdown: ShutdownSignal,
}

impl Context {
    /// Load settings and registry; `init_config` creates missing state
    pub async fn load(&self, init_config: bool) -> Result<Arc<AppState>, SyncError> {
        let mut options = AppOptions::new(self.layout.clone(), self.projects_root.clone());
        options.config_file = self.config_file.clone();
        options.init_config = init_config;
        Ok(Arc::new(AppState::init(&options, self.shutdown.clone()).await?))
    }
}

/// Detect the compose CLI when any registered project deploys
pub async fn runtime_for(state: &AppState) -> Option<Arc<dyn ContainerRuntime>> {
    if state.registry.all().iter().any(|p| p.deployment.is_some()) {
        Some(Arc::new(ComposeCli::detect(&state.settings).await))
    } else {
        None
    }
}
