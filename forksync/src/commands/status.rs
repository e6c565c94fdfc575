//! `forksync status`
//!
//! Read-only: nothing is created, locked or written.

use colored::Colorize;

use crate::cli::SelectArgs;
use crate::commands::output::{print_report, short};
use crate::commands::Context;
use crate::registry::Selection;
use crate::storage::lock::InstanceLock;

pub async fn run(ctx: &Context, args: &SelectArgs) -> anyhow::Result<bool> {
    let state = ctx.load(false).await?;

    let config = ctx.config_file.path();
    let exists = ctx.config_file.exists().await;
    println!(
        "{} {} {}",
        "Configuration:".bold(),
        config.display(),
        if exists { "".normal() } else { "(missing, defaults in use)".yellow() }
    );
    println!("{} {}", "State:".bold(), state.layout.base_dir.display());

    match InstanceLock::read_owner(state.layout.lock_file().path()) {
        Some(owner) => println!(
            "{} held by pid {} on {} since {}",
            "Lock:".bold(),
            owner.pid,
            owner.hostname,
            owner.acquired_at.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("{} free", "Lock:".bold()),
    }

    println!();
    println!("{}", "Projects".bold().underline());
    let selection = state.registry.select(args.project.as_deref());
    if selection.is_empty() {
        println!("  none registered");
    }

    let mut healthy = true;
    for selected in &selection {
        match selected {
            Selection::Ready(project) => {
                let origin = project.origin_url.as_deref().unwrap_or("(origin not set)");
                println!(
                    "  {} {:<20} {} [{}]",
                    "✓".green(),
                    project.name,
                    project.path.display(),
                    project.branch
                );
                println!("      upstream {}", project.upstream_url);
                println!("      origin   {}", origin);
                if let Some(deployment) = &project.deployment {
                    let deployed = match state.deploy_cache.get(&project.name).await? {
                        Some(record) => format!(", deployed {}", short(&record.revision)),
                        None => String::new(),
                    };
                    println!(
                        "      deploy   {} ({}){}",
                        deployment.service,
                        deployment.compose_file.display(),
                        deployed
                    );
                }

                let ledger = state.store.ledger(&project.name).await?;
                if let Some(head) = ledger.checkpoints.last() {
                    let reverted = match ledger.reverted_to {
                        Some(seq) => format!(", rolled back to #{}", seq),
                        None => String::new(),
                    };
                    println!(
                        "      last     #{} {} {} {}{}",
                        head.seq,
                        head.label,
                        head.short_revision(),
                        head.created_at.format("%Y-%m-%d %H:%M:%S"),
                        reverted
                    );
                }
            }
            Selection::Rejected(rejected) => {
                healthy = false;
                println!("  {} {:<20} {}", "✗".red(), rejected.name, rejected.reason.red());
            }
        }
    }

    if let Some(report) = state.history.last().await? {
        println!();
        println!(
            "{} {}",
            "Last run".bold().underline(),
            report.finished_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
        print_report(&report);
    }

    Ok(healthy)
}
