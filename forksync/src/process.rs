//! External command execution
//!
//! Every tool invocation (git, compose, hooks) goes through [`Cmd`], which
//! always runs in an explicit working directory and under a timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::errors::SyncError;

/// Captured result of a finished command
#[derive(Debug, Clone, Default)]
pub struct CmdOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout and stderr joined, for pattern checks that do not care which stream
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// A command to run
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    envs: Vec<(String, String)>,
    timeout: Duration,
}

impl Cmd {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            envs: Vec::new(),
            timeout: Duration::from_secs(180),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn envs(mut self, envs: &[(String, String)]) -> Self {
        self.envs.extend_from_slice(envs);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Human readable command line
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run the command and capture its output, whatever the exit status
    pub async fn output(&self) -> Result<CmdOutput, SyncError> {
        debug!("Running `{}` in {}", self.display(), self.cwd.display());

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            command.env(key, value);
        }

        let child = command.spawn().map_err(|e| SyncError::CommandFailed {
            command: self.display(),
            stderr: format!("failed to spawn: {}", e),
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SyncError::Timeout {
                    command: self.display(),
                    timeout: self.timeout,
                })
            }
        };

        let result = CmdOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        if !result.stdout.is_empty() {
            debug!("stdout: {}", result.stdout);
        }
        if !result.stderr.is_empty() {
            debug!("stderr: {}", result.stderr);
        }
        Ok(result)
    }

    /// Run the command and fail unless it exits successfully
    pub async fn checked(&self) -> Result<CmdOutput, SyncError> {
        let output = self.output().await?;
        if output.success() {
            Ok(output)
        } else {
            Err(SyncError::CommandFailed {
                command: self.display(),
                stderr: if output.stderr.is_empty() {
                    output.stdout
                } else {
                    output.stderr
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runs_in_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = Cmd::new("sh", dir.path())
            .args(["-c", "pwd"])
            .checked()
            .await
            .unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(Path::new(&out.stdout).canonicalize().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = Cmd::new("sh", dir.path())
            .args(["-c", "sleep 5"])
            .timeout(Duration::from_millis(100))
            .output()
            .await;
        assert!(matches!(result, Err(SyncError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_checked_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let result = Cmd::new("sh", dir.path())
            .args(["-c", "echo boom >&2; exit 3"])
            .checked()
            .await;
        match result {
            Err(SyncError::CommandFailed { stderr, .. }) => assert_eq!(stderr, "boom"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let result = Cmd::new("definitely-not-a-real-binary", dir.path())
            .output()
            .await;
        assert!(matches!(result, Err(SyncError::CommandFailed { .. })));
    }
}
