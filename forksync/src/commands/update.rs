//! `forksync update`

use colored::Colorize;

use crate::app::options::RunOptions;
use crate::app::run::Orchestrator;
use crate::cli::UpdateArgs;
use crate::commands::{output, runtime_for, Context};
use crate::models::run::RunMode;

pub async fn run(ctx: &Context, args: &UpdateArgs) -> anyhow::Result<bool> {
    let state = ctx.load(true).await?;

    let mut options = RunOptions::from_settings(&state.settings);
    if args.parallel {
        options.mode = RunMode::Parallel;
    } else if args.sequential {
        options.mode = RunMode::Sequential;
    }
    options.fail_fast = args.fail_fast;
    options.force_push |= args.force_push;
    options.skip_deploy = args.skip_deploy;
    if let Some(workers) = args.max_workers {
        options.max_workers = workers.max(1);
    }

    let runtime = if options.skip_deploy {
        None
    } else {
        runtime_for(&state).await
    };

    let orchestrator = Orchestrator::new(state.clone(), runtime, options);
    let report = orchestrator.update(args.project.as_deref()).await?;

    if report.runs.is_empty() {
        println!("{}", "No projects configured; see `forksync export-config`".yellow());
        return Ok(false);
    }
    output::print_report(&report);
    Ok(report.all_succeeded())
}
