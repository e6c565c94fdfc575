//! Checkpoint models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stage a checkpoint was taken at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointLabel {
    BeforeUpdate,
    AfterRemoteSetup,
    AfterFetch,
    AfterMerge,
    AfterPush,
    AfterRollback,
    Manual,
}

impl CheckpointLabel {
    /// Labels written by an update, in pipeline order
    pub const PIPELINE: [CheckpointLabel; 5] = [
        CheckpointLabel::BeforeUpdate,
        CheckpointLabel::AfterRemoteSetup,
        CheckpointLabel::AfterFetch,
        CheckpointLabel::AfterMerge,
        CheckpointLabel::AfterPush,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointLabel::BeforeUpdate => "before_update",
            CheckpointLabel::AfterRemoteSetup => "after_remote_setup",
            CheckpointLabel::AfterFetch => "after_fetch",
            CheckpointLabel::AfterMerge => "after_merge",
            CheckpointLabel::AfterPush => "after_push",
            CheckpointLabel::AfterRollback => "after_rollback",
            CheckpointLabel::Manual => "manual",
        }
    }
}

impl std::fmt::Display for CheckpointLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckpointLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        [CheckpointLabel::AfterRollback, CheckpointLabel::Manual]
            .into_iter()
            .chain(CheckpointLabel::PIPELINE)
            .find(|label| label.as_str() == normalized)
            .ok_or_else(|| format!("Unknown checkpoint label: {}", s))
    }
}

/// An immutable snapshot of a project's version-control state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub project: String,

    /// Position in the project's ledger, starting at 1
    pub seq: u64,

    pub label: CheckpointLabel,

    /// Commit id of HEAD when the checkpoint was taken
    pub revision: String,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Digest of the repository bundle taken with this checkpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
}

impl Checkpoint {
    /// Short form of the revision for display
    pub fn short_revision(&self) -> &str {
        let end = self.revision.len().min(10);
        &self.revision[..end]
    }
}

/// The persisted, append-only record of one project's checkpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    pub project: String,

    /// Next sequence number; never reused, even after pruning
    pub next_seq: u64,

    /// Sequence number of the checkpoint the project was last rolled back to
    #[serde(default)]
    pub reverted_to: Option<u64>,

    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
}

impl Ledger {
    pub fn new(project: &str) -> Self {
        Self {
            project: project.to_string(),
            next_seq: 1,
            reverted_to: None,
            checkpoints: Vec::new(),
        }
    }

    /// Latest checkpoint with `label`
    pub fn find_label(&self, label: CheckpointLabel) -> Option<&Checkpoint> {
        self.checkpoints.iter().rev().find(|c| c.label == label)
    }

    pub fn find_seq(&self, seq: u64) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.seq == seq)
    }
}
