//! `forksync cleanup`

use std::sync::Arc;

use chrono::Utc;
use colored::Colorize;

use crate::commands::Context;
use crate::deploy::compose::{ComposeCli, ContainerRuntime};
use crate::maintenance::cleanup::cleanup;

pub async fn run(ctx: &Context) -> anyhow::Result<bool> {
    let state = ctx.load(true).await?;

    let runtime: Option<Arc<dyn ContainerRuntime>> = if state.settings.docker.auto_prune {
        Some(Arc::new(ComposeCli::detect(&state.settings).await))
    } else {
        None
    };

    let report = cleanup(&state, runtime.as_deref(), Utc::now()).await?;

    println!("{}", "forksync cleanup".bold());
    println!("  checkpoints removed: {}", report.checkpoints_removed);
    println!("  bundles removed:     {}", report.bundles_removed);
    println!("  log files removed:   {}", report.logs_removed);
    if report.container_prune {
        println!("  images removed:      {}", report.images_removed);
    }
    if !report.removed_anything() {
        println!("  {}", "nothing to remove".dimmed());
    }
    for error in &report.errors {
        println!("  {} {}", "✗".red(), error);
    }
    Ok(report.errors.is_empty())
}
