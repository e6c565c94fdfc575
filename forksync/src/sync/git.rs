//! Git command wrapper
//!
//! Every call runs `git` in the repository directory given at construction,
//! with a timeout and the configured proxy environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::errors::SyncError;
use crate::process::{Cmd, CmdOutput};
use crate::storage::settings::NetworkSettings;

const TRANSIENT_PATTERNS: &[&str] = &[
    "could not resolve host",
    "connection timed out",
    "connection refused",
    "connection reset",
    "unable to access",
    "early eof",
    "rpc failed",
    "tls",
    "ssl",
    "operation timed out",
];

const REJECTION_PATTERNS: &[&str] = &["[rejected]", "non-fast-forward", "fetch first"];

/// True when git's output describes a failure worth retrying
pub fn is_transient_network_error(output: &str) -> bool {
    let lower = output.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// True when a push was refused because the remote moved ahead
pub fn is_push_rejection(output: &str) -> bool {
    let lower = output.to_lowercase();
    REJECTION_PATTERNS.iter().any(|p| lower.contains(p))
}

/// What `ensure_remote` had to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteChange {
    Unchanged,
    Added,
    Updated { previous: String },
}

/// A path left unmerged by a merge, with the index stages present for it.
/// Stage 1 is the common ancestor, 2 is ours, 3 is theirs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmergedPath {
    pub path: String,
    pub stages: Vec<u8>,
    /// Blob id of the upstream version, when it exists
    pub theirs: Option<String>,
}

impl UnmergedPath {
    /// Both sides modified or both added the file (UU, AA)
    pub fn is_content_conflict(&self) -> bool {
        self.stages.contains(&2) && self.stages.contains(&3)
    }
}

/// Result of `git merge`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    UpToDate,
    Merged,
    Conflicted(Vec<UnmergedPath>),
}

#[derive(Debug, Clone)]
pub struct GitCli {
    dir: PathBuf,
    timeout: Duration,
    envs: Vec<(String, String)>,
    ssl_verify: bool,
}

impl GitCli {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            timeout: Duration::from_secs(180),
            envs: Vec::new(),
            ssl_verify: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_network(mut self, network: &NetworkSettings) -> Self {
        self.envs = network.child_env();
        self.ssl_verify = network.ssl_verify;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn cmd<I, S>(&self, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cmd = Cmd::new("git", &self.dir)
            .timeout(self.timeout)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .envs(&self.envs);
        if !self.ssl_verify {
            cmd = cmd.args(["-c", "http.sslVerify=false"]);
        }
        cmd.args(args)
    }

    async fn run<I, S>(&self, args: I) -> Result<String, SyncError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.cmd(args).checked().await?.stdout)
    }

    async fn output<I, S>(&self, args: I) -> Result<CmdOutput, SyncError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd(args).output().await
    }

    pub async fn is_repository(&self) -> bool {
        if !tokio::fs::metadata(&self.dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return false;
        }
        self.output(["rev-parse", "--is-inside-work-tree"])
            .await
            .map(|o| o.success() && o.stdout == "true")
            .unwrap_or(false)
    }

    pub async fn head(&self) -> Result<String, SyncError> {
        self.run(["rev-parse", "HEAD"]).await
    }

    /// Tree id of HEAD; equal for identical contents regardless of history
    pub async fn tree_id(&self) -> Result<String, SyncError> {
        self.run(["rev-parse", "HEAD^{tree}"]).await
    }

    pub async fn current_branch(&self) -> Result<String, SyncError> {
        self.run(["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    /// Tracked files with uncommitted changes, as porcelain status lines
    pub async fn dirty_files(&self) -> Result<Vec<String>, SyncError> {
        let out = self
            .run(["status", "--porcelain", "--untracked-files=no"])
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn remote_url(&self, name: &str) -> Result<Option<String>, SyncError> {
        let out = self.output(["remote", "get-url", name]).await?;
        Ok(out.success().then_some(out.stdout).filter(|u| !u.is_empty()))
    }

    /// Where pushes to `name` go; differs from the fetch URL when
    /// `remote.<name>.pushurl` is set
    pub async fn push_url(&self, name: &str) -> Result<Option<String>, SyncError> {
        let out = self.output(["remote", "get-url", "--push", name]).await?;
        Ok(out.success().then_some(out.stdout).filter(|u| !u.is_empty()))
    }

    /// Make pushes to `name` go to `url`
    pub async fn ensure_push_url(&self, name: &str, url: &str) -> Result<RemoteChange, SyncError> {
        match self.push_url(name).await? {
            Some(current) if current == url => Ok(RemoteChange::Unchanged),
            current => {
                self.run(["remote", "set-url", "--push", name, url])
                    .await
                    .map_err(|e| SyncError::RemoteMismatch {
                        remote: name.to_string(),
                        url: url.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(match current {
                    Some(previous) => RemoteChange::Updated { previous },
                    None => RemoteChange::Added,
                })
            }
        }
    }

    /// Make `name` point at `url`, adding or correcting it as needed
    pub async fn ensure_remote(&self, name: &str, url: &str) -> Result<RemoteChange, SyncError> {
        let mismatch = |reason: String| SyncError::RemoteMismatch {
            remote: name.to_string(),
            url: url.to_string(),
            reason,
        };

        match self.remote_url(name).await? {
            Some(current) if current == url => Ok(RemoteChange::Unchanged),
            Some(current) => {
                self.run(["remote", "set-url", name, url])
                    .await
                    .map_err(|e| mismatch(e.to_string()))?;
                Ok(RemoteChange::Updated { previous: current })
            }
            None => {
                self.run(["remote", "add", name, url])
                    .await
                    .map_err(|e| mismatch(e.to_string()))?;
                Ok(RemoteChange::Added)
            }
        }
    }

    pub async fn fetch(&self, remote: &str) -> Result<(), SyncError> {
        let out = self.output(["fetch", remote, "--tags", "--prune"]).await?;
        if out.success() {
            return Ok(());
        }
        let detail = out.combined();
        if is_transient_network_error(&detail) {
            Err(SyncError::NetworkError(out.stderr))
        } else {
            Err(SyncError::CommandFailed {
                command: format!("git fetch {}", remote),
                stderr: out.stderr,
            })
        }
    }

    /// Whether `rev` names a commit available locally
    pub async fn has_commit(&self, rev: &str) -> bool {
        let object = format!("{}^{{commit}}", rev);
        self.output(["cat-file", "-e", object.as_str()])
            .await
            .map(|o| o.success())
            .unwrap_or(false)
    }

    pub async fn merge(&self, rev: &str) -> Result<MergeOutcome, SyncError> {
        let before = self.head().await?;
        let out = self.output(["merge", rev, "--no-edit"]).await?;
        if out.success() {
            let after = self.head().await?;
            return Ok(if before == after {
                MergeOutcome::UpToDate
            } else {
                MergeOutcome::Merged
            });
        }

        let unmerged = self.unmerged().await?;
        if unmerged.is_empty() {
            return Err(SyncError::CommandFailed {
                command: format!("git merge {}", rev),
                stderr: if out.stderr.is_empty() { out.stdout } else { out.stderr },
            });
        }
        Ok(MergeOutcome::Conflicted(unmerged))
    }

    /// Unmerged index entries, grouped by path
    pub async fn unmerged(&self) -> Result<Vec<UnmergedPath>, SyncError> {
        let out = self.run(["ls-files", "-u", "-z"]).await?;
        let mut paths: Vec<UnmergedPath> = Vec::new();

        // <mode> SP <object> SP <stage> TAB <path> NUL
        for record in out.split('\0').filter(|r| !r.is_empty()) {
            let Some((meta, path)) = record.split_once('\t') else {
                continue;
            };
            let mut fields = meta.split_whitespace();
            let (Some(_mode), Some(object), Some(stage)) = (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let Ok(stage) = stage.parse::<u8>() else {
                continue;
            };

            let entry = match paths.iter().position(|p| p.path == path) {
                Some(i) => &mut paths[i],
                None => {
                    paths.push(UnmergedPath {
                        path: path.to_string(),
                        stages: Vec::new(),
                        theirs: None,
                    });
                    let last = paths.len() - 1;
                    &mut paths[last]
                }
            };
            entry.stages.push(stage);
            if stage == 3 {
                entry.theirs = Some(object.to_string());
            }
        }
        Ok(paths)
    }

    /// Whether a blob looks like text (no NUL byte)
    pub async fn is_text_blob(&self, object: &str) -> Result<bool, SyncError> {
        let out = self.run(["cat-file", "blob", object]).await?;
        Ok(!out.contains('\0'))
    }

    /// Resolve a conflicted path with the upstream version and stage it
    pub async fn take_theirs(&self, path: &str) -> Result<(), SyncError> {
        self.run(["checkout", "--theirs", "--", path]).await?;
        self.run(["add", "--", path]).await?;
        Ok(())
    }

    pub async fn commit_merge(&self) -> Result<(), SyncError> {
        self.run(["commit", "--no-edit"]).await?;
        Ok(())
    }

    pub async fn merge_in_progress(&self) -> bool {
        self.output(["rev-parse", "-q", "--verify", "MERGE_HEAD"])
            .await
            .map(|o| o.success())
            .unwrap_or(false)
    }

    pub async fn abort_merge(&self) -> Result<(), SyncError> {
        if self.merge_in_progress().await {
            debug!("Aborting merge in {}", self.dir.display());
            self.run(["merge", "--abort"]).await?;
        }
        Ok(())
    }

    /// Stash tracked changes. Returns false when there was nothing to stash.
    pub async fn stash(&self, message: &str) -> Result<bool, SyncError> {
        let before = self.output(["rev-parse", "-q", "--verify", "refs/stash"]).await?;
        self.run(["stash", "push", "-m", message]).await?;
        let after = self.output(["rev-parse", "-q", "--verify", "refs/stash"]).await?;
        Ok(after.success() && after.stdout != before.stdout)
    }

    pub async fn stash_pop(&self) -> Result<(), SyncError> {
        self.run(["stash", "pop"]).await?;
        Ok(())
    }

    pub async fn push(&self, remote: &str, branch: &str, force: bool) -> Result<(), SyncError> {
        let mut args = vec!["push".to_string(), remote.to_string(), branch.to_string()];
        if force {
            args.push("--force-with-lease".to_string());
        }
        let out = self.output(args).await?;
        if out.success() {
            return Ok(());
        }

        let detail = out.combined();
        if is_push_rejection(&detail) {
            Err(SyncError::PushRejected(out.stderr))
        } else if is_transient_network_error(&detail) {
            Err(SyncError::NetworkError(out.stderr))
        } else {
            Err(SyncError::CommandFailed {
                command: format!("git push {} {}", remote, branch),
                stderr: out.stderr,
            })
        }
    }

    /// Full, self-contained bundle of every ref
    pub async fn bundle_create(&self, target: &Path) -> Result<(), SyncError> {
        self.run(["bundle".to_string(), "create".to_string(), target.display().to_string(), "--all".to_string()])
            .await?;
        Ok(())
    }

    /// Import the objects of a bundle without touching any ref
    pub async fn bundle_unbundle(&self, bundle: &Path) -> Result<(), SyncError> {
        self.run(["bundle".to_string(), "unbundle".to_string(), bundle.display().to_string()])
            .await?;
        Ok(())
    }

    pub async fn checkout(&self, branch: &str) -> Result<(), SyncError> {
        self.run(["checkout", branch]).await?;
        Ok(())
    }

    pub async fn reset_hard(&self, rev: &str) -> Result<(), SyncError> {
        self.run(["reset", "--hard", rev]).await?;
        Ok(())
    }

    /// Paths changed between two revisions
    pub async fn changed_files(&self, from: &str, to: &str) -> Result<Vec<String>, SyncError> {
        if from == to {
            return Ok(Vec::new());
        }
        let out = self.run(["diff", "--name-only", from, to]).await?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
    }
}
