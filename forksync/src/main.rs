//! forksync - Entry Point
//!
//! Keeps forked repositories in sync with their upstream and redeploys the
//! compose services built from them.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use tracing::{debug, error, info};

use forksync::app::shutdown::{self, ShutdownTrigger};
use forksync::cli::{Cli, Command};
use forksync::commands::{self, Context};
use forksync::filesys::file::File;
use forksync::logs::{init_logging, LogOptions};
use forksync::storage::layout::StorageLayout;
use forksync::storage::lock::{InstanceLock, SysinfoLiveness};
use forksync::storage::settings::Settings;
use forksync::utils::version_info;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Print version and exit
    let version = version_info();
    if cli.version {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    let Some(command) = cli.command else {
        // Help goes to stdout; a failure to print it changes nothing
        let _ = Cli::command().print_help();
        return ExitCode::from(2);
    };

    let layout = StorageLayout::resolve(cli.home);
    let config_file = cli
        .config
        .map(File::new)
        .unwrap_or_else(|| layout.config_file());

    // Logging: flag > environment > file
    let mut settings = match Settings::load(&config_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = settings.apply_process_env() {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }
    let log_options = LogOptions {
        log_level: cli.log_level.unwrap_or(settings.logging.log_level),
        json_format: cli.json_logs || settings.logging.json_format,
        log_dir: command
            .is_mutating()
            .then(|| layout.logs_dir().path().to_path_buf()),
        max_log_files: settings.logging.max_log_files,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };
    debug!("forksync {} ({}) {}", version.version, version.git_hash, command.name());

    let (trigger, signal) = shutdown::channel();
    tokio::spawn(cancel_on_signal(trigger));

    let _instance_lock = if command.is_mutating() {
        match InstanceLock::acquire(layout.lock_file().path(), &SysinfoLiveness) {
            Ok(lock) => Some(lock),
            Err(e) => {
                error!("{}", e);
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    let ctx = Context {
        layout,
        config_file,
        projects_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        shutdown: signal,
    };

    let result = match &command {
        Command::Update(args) => commands::update::run(&ctx, args).await,
        Command::Status(args) => commands::status::run(&ctx, args).await,
        Command::Rollback(args) => commands::rollback::run(&ctx, args).await,
        Command::ListCheckpoints(args) => commands::checkpoints::run(&ctx, args).await,
        Command::Cleanup => commands::cleanup::run(&ctx).await,
        Command::ExportConfig(args) => commands::export_config::run(&ctx, args).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{} failed: {:#}", command.name(), e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Cancel the batch on SIGTERM, SIGINT or Ctrl+C
async fn cancel_on_signal(trigger: ShutdownTrigger) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                error!("Unable to install signal handlers; interrupts will not cancel cleanly");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, cancelling...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, cancelling...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            error!("Unable to listen for Ctrl+C");
            return;
        }
        info!("Ctrl+C received, cancelling...");
    }

    trigger.cancel();
}
