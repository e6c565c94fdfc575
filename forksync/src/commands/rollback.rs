//! `forksync rollback`

use colored::Colorize;

use crate::app::options::RunOptions;
use crate::app::run::Orchestrator;
use crate::cli::RollbackArgs;
use crate::commands::{output, runtime_for, Context};
use crate::models::run::RunStatus;

pub async fn run(ctx: &Context, args: &RollbackArgs) -> anyhow::Result<bool> {
    let state = ctx.load(true).await?;
    let runtime = runtime_for(&state).await;
    let options = RunOptions::from_settings(&state.settings);

    let orchestrator = Orchestrator::new(state.clone(), runtime, options);
    let report = orchestrator
        .rollback(args.project.as_deref(), args.checkpoint.unwrap_or_default(), args.force)
        .await?;

    if report.runs.is_empty() {
        println!("{}", "No projects configured".yellow());
        return Ok(false);
    }
    output::print_report(&report);
    Ok(report.all(RunStatus::RolledBack))
}
