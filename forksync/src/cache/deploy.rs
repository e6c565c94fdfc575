//! Last successful deployment per project

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SyncError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// What was running after the last successful deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRecord {
    /// Source fingerprint the images were built from
    pub fingerprint: String,
    pub revision: String,
    pub deployed_at: DateTime<Utc>,
}

/// Deployment records stored as `cache/deploy/<project>.json`
#[derive(Debug, Clone)]
pub struct DeployCache {
    dir: Dir,
}

impl DeployCache {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }

    fn file(&self, project: &str) -> File {
        let name: String = project
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.file(&format!("{}.json", name))
    }

    pub async fn get(&self, project: &str) -> Result<Option<DeployRecord>, SyncError> {
        self.file(project).read_json_opt().await
    }

    pub async fn put(&self, project: &str, record: &DeployRecord) -> Result<(), SyncError> {
        self.file(project).write_json(record).await
    }

    pub async fn remove(&self, project: &str) -> Result<(), SyncError> {
        self.file(project).delete().await
    }
}
