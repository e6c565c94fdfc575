//! `forksync list-checkpoints`

use colored::Colorize;

use crate::cli::SelectArgs;
use crate::commands::Context;
use crate::registry::Selection;

pub async fn run(ctx: &Context, args: &SelectArgs) -> anyhow::Result<bool> {
    let state = ctx.load(false).await?;

    // Ledgers outlive registry entries, so unknown names are still listed
    let names: Vec<String> = match args.project.as_deref() {
        None | Some("all") => state.store.projects().await?,
        Some(key) => match state.registry.resolve(key) {
            Ok(project) => vec![project.name.clone()],
            Err(_) => state
                .registry
                .select(Some(key))
                .iter()
                .map(Selection::name)
                .map(str::to_string)
                .collect(),
        },
    };

    if names.is_empty() {
        println!("No checkpoints stored");
        return Ok(true);
    }

    for name in names {
        let ledger = state.store.ledger(&name).await?;
        println!("{} ({} checkpoints)", name.bold(), ledger.checkpoints.len());
        for checkpoint in &ledger.checkpoints {
            let marker = if ledger.reverted_to == Some(checkpoint.seq) {
                "←".cyan().to_string()
            } else {
                " ".to_string()
            };
            println!(
                "  {} #{:<5} {:<16} {:<10} {}",
                marker,
                checkpoint.seq,
                checkpoint.label.to_string(),
                checkpoint.short_revision(),
                checkpoint.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
            );
        }
    }
    Ok(true)
}
