//! Run report history

use crate::errors::SyncError;
use crate::filesys::file::File;
use crate::models::run::RunReport;

/// Number of reports kept in `runs.json`
pub const MAX_REPORTS: usize = 20;

#[derive(Debug, Clone)]
pub struct RunHistory {
    file: File,
}

impl RunHistory {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// All kept reports, oldest first
    pub async fn all(&self) -> Result<Vec<RunReport>, SyncError> {
        Ok(self.file.read_json_opt().await?.unwrap_or_default())
    }

    pub async fn last(&self) -> Result<Option<RunReport>, SyncError> {
        Ok(self.all().await?.pop())
    }

    /// Most recent report of `command`
    pub async fn last_of(&self, command: &str) -> Result<Option<RunReport>, SyncError> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .rev()
            .find(|r| r.command == command))
    }

    pub async fn append(&self, report: &RunReport) -> Result<(), SyncError> {
        let mut reports = self.all().await?;
        reports.push(report.clone());
        if reports.len() > MAX_REPORTS {
            let excess = reports.len() - MAX_REPORTS;
            reports.drain(..excess);
        }
        self.file.write_json(&reports).await
    }
}
