//! Human readable summaries

use colored::{ColoredString, Colorize};

use crate::models::run::{DeployOutcome, GitOutcome, RunReport, RunStatus, UpdateRun};

pub fn status_label(status: RunStatus) -> ColoredString {
    let text = format!("{:<15}", status.to_string());
    match status {
        RunStatus::Success => text.green().bold(),
        RunStatus::PartialFailure => text.yellow().bold(),
        RunStatus::RolledBack => text.cyan().bold(),
        RunStatus::Failed => text.red().bold(),
    }
}

fn git_label(git: GitOutcome) -> &'static str {
    match git {
        GitOutcome::NotStarted => "not started",
        GitOutcome::Failed => "failed",
        GitOutcome::Pushed => "pushed",
        GitOutcome::RolledBack => "rolled back",
    }
}

fn deploy_label(deploy: DeployOutcome) -> &'static str {
    match deploy {
        DeployOutcome::NotApplicable => "-",
        DeployOutcome::Skipped => "skipped",
        DeployOutcome::Unchanged => "unchanged",
        DeployOutcome::Healthy => "healthy",
        DeployOutcome::Failed => "failed",
    }
}

pub fn print_run(run: &UpdateRun) {
    let revision = match (&run.before_revision, &run.after_revision) {
        (Some(before), Some(after)) if before != after => format!("{} -> {}", short(before), short(after)),
        (_, Some(after)) => short(after).to_string(),
        (Some(before), None) => short(before).to_string(),
        (None, None) => "-".to_string(),
    };

    println!(
        "  {} {:<20} git: {:<12} deploy: {:<10} {:<20} {:.1}s",
        status_label(run.status),
        run.project,
        git_label(run.git),
        deploy_label(run.deploy),
        revision,
        run.duration_ms as f64 / 1000.0
    );

    if let Some(error) = &run.error {
        println!("      {} at {}: {}", error.kind.to_string().red(), error.stage, error.message);
    }
    if let Some(error) = &run.deploy_error {
        let cycles = if run.restart_cycles > 0 {
            format!(" after {} restart cycles", run.restart_cycles)
        } else {
            String::new()
        };
        println!("      {}{}: {}", "deployment failed".red(), cycles, error.message);
    }
    for event in run.events.iter().filter(|_| run.status != RunStatus::Success) {
        println!("      {} {}", format!("[{}]", event.stage).dimmed(), event.message);
    }
}

pub fn print_report(report: &RunReport) {
    println!(
        "{} {} ({:?}, run {})",
        "forksync".bold(),
        report.command,
        report.mode,
        &report.run_id[..report.run_id.len().min(8)]
    );
    for run in &report.runs {
        print_run(run);
    }

    let summary = format!(
        "{} projects: {} succeeded, {} partial, {} rolled back, {} failed",
        report.runs.len(),
        report.count(RunStatus::Success),
        report.count(RunStatus::PartialFailure),
        report.count(RunStatus::RolledBack),
        report.count(RunStatus::Failed)
    );
    if report.count(RunStatus::Failed) > 0 {
        println!("{}", summary.red());
    } else if report.count(RunStatus::PartialFailure) > 0 {
        println!("{}", summary.yellow());
    } else {
        println!("{}", summary.green());
    }
}

pub fn short(revision: &str) -> &str {
    &revision[..revision.len().min(8)]
}
