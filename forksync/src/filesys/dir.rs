//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::SyncError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), SyncError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), SyncError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// List files in the directory. A missing directory has no files.
    pub async fn list_files(&self) -> Result<Vec<PathBuf>, SyncError> {
        self.list(|m| m.is_file()).await
    }

    /// List subdirectories. A missing directory has no subdirectories.
    pub async fn list_dirs(&self) -> Result<Vec<PathBuf>, SyncError> {
        self.list(|m| m.is_dir()).await
    }

    async fn list(&self, keep: impl Fn(&std::fs::Metadata) -> bool) -> Result<Vec<PathBuf>, SyncError> {
        let mut paths = Vec::new();
        let mut entries = match fs::read_dir(&self.path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(paths),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if keep(&metadata) {
                paths.push(entry.path());
            }
        }

        paths.sort();
        Ok(paths)
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }
}
