//! Command line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::logs::LogLevel;
use crate::rollback::engine::RollbackTarget;

/// Keep forks in sync with upstream and redeploy their services
#[derive(Parser, Debug)]
#[command(name = "forksync")]
#[command(about, long_about = None, disable_version_flag = true)]
pub struct Cli {
    /// State directory (default ~/.forksync)
    #[arg(long, global = true, env = "FORKSYNC_HOME")]
    pub home: Option<PathBuf>,

    /// Configuration file (default <home>/forksync.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level, overrides FORKSYNC_LOG_LEVEL and the configuration
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Log as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Print version information
    #[arg(short = 'V', long)]
    pub version: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Merge upstream into each fork, push, and redeploy
    Update(UpdateArgs),

    /// Show configuration, registry, last run and checkpoint heads
    Status(SelectArgs),

    /// Restore projects to a checkpoint
    Rollback(RollbackArgs),

    /// List stored checkpoints
    ListCheckpoints(SelectArgs),

    /// Remove aged checkpoints, unused backups and old logs
    Cleanup,

    /// Write a commented configuration template
    ExportConfig(ExportArgs),
}

impl Command {
    /// Commands that change state take the instance lock
    pub fn is_mutating(&self) -> bool {
        matches!(self, Command::Update(_) | Command::Rollback(_) | Command::Cleanup)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Update(_) => "update",
            Command::Status(_) => "status",
            Command::Rollback(_) => "rollback",
            Command::ListCheckpoints(_) => "list-checkpoints",
            Command::Cleanup => "cleanup",
            Command::ExportConfig(_) => "export-config",
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct SelectArgs {
    /// Project name or alias, or `all`
    #[arg(short, long)]
    pub project: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct UpdateArgs {
    /// Project name or alias, or `all`
    #[arg(short, long)]
    pub project: Option<String>,

    /// Run projects concurrently
    #[arg(long, conflicts_with = "sequential")]
    pub parallel: bool,

    /// Run projects one at a time
    #[arg(long)]
    pub sequential: bool,

    /// Push with --force-with-lease
    #[arg(long)]
    pub force_push: bool,

    /// Do not rebuild or restart containers
    #[arg(long)]
    pub skip_deploy: bool,

    /// Stop after the first failed project (sequential mode)
    #[arg(long)]
    pub fail_fast: bool,

    /// Concurrent pipelines in parallel mode
    #[arg(long)]
    pub max_workers: Option<usize>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RollbackArgs {
    /// Project name or alias, or `all`
    #[arg(short, long)]
    pub project: Option<String>,

    /// Checkpoint label or sequence number (default: latest before_update)
    #[arg(short, long)]
    pub checkpoint: Option<RollbackTarget>,

    /// Discard uncommitted changes
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ExportArgs {
    /// Output path (default <home>/forksync.template.toml)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::checkpoint::CheckpointLabel;

    #[test]
    fn test_parse_update() {
        let cli = Cli::try_parse_from([
            "forksync",
            "--log-level",
            "debug",
            "update",
            "--project",
            "tb",
            "--parallel",
            "--skip-deploy",
        ])
        .unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        match cli.command {
            Some(Command::Update(args)) => {
                assert_eq!(args.project.as_deref(), Some("tb"));
                assert!(args.parallel && args.skip_deploy && !args.force_push);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parallel_conflicts_with_sequential() {
        assert!(Cli::try_parse_from(["forksync", "update", "--parallel", "--sequential"]).is_err());
    }

    #[test]
    fn test_parse_rollback_target() {
        let cli = Cli::try_parse_from(["forksync", "rollback", "-p", "chat", "--checkpoint", "after_merge"]).unwrap();
        match cli.command {
            Some(Command::Rollback(args)) => {
                assert_eq!(args.checkpoint, Some(RollbackTarget::Label(CheckpointLabel::AfterMerge)));
                assert!(!args.force);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_mutating_commands() {
        let cli = Cli::try_parse_from(["forksync", "status"]).unwrap();
        assert!(!cli.command.unwrap().is_mutating());
        let cli = Cli::try_parse_from(["forksync", "cleanup"]).unwrap();
        assert!(cli.command.unwrap().is_mutating());
    }
}
