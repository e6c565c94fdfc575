//! Application configuration options

use std::path::PathBuf;

use crate::filesys::file::File;
use crate::models::run::RunMode;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Where state lives and how it is loaded
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Configuration document; defaults to the layout's
    pub config_file: File,

    /// Root that relative project paths resolve against when the
    /// configuration does not set `projects_root`
    pub default_projects_root: PathBuf,

    /// Write the commented template when the configuration is missing.
    /// Read-only commands leave this off.
    pub init_config: bool,
}

impl AppOptions {
    pub fn new(layout: StorageLayout, default_projects_root: PathBuf) -> Self {
        Self {
            config_file: layout.config_file(),
            layout,
            default_projects_root,
            init_config: false,
        }
    }
}

/// Options of one `update` invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: RunMode,

    /// Sequential mode only: stop after the first failed project
    pub fail_fast: bool,

    pub force_push: bool,

    pub skip_deploy: bool,

    /// Pipelines running at once in parallel mode
    pub max_workers: usize,
}

impl RunOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            mode: if settings.performance.parallel {
                RunMode::Parallel
            } else {
                RunMode::Sequential
            },
            fail_fast: false,
            force_push: settings.general.force_push,
            skip_deploy: false,
            max_workers: settings.max_workers(),
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}
