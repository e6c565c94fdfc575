//! `forksync export-config`

use colored::Colorize;

use crate::cli::ExportArgs;
use crate::commands::Context;
use crate::errors::SyncError;
use crate::filesys::file::File;
use crate::storage::template::CONFIG_TEMPLATE;

pub async fn run(ctx: &Context, args: &ExportArgs) -> anyhow::Result<bool> {
    let target = match &args.output {
        Some(path) => File::new(path.clone()),
        None => ctx.layout.template_file(),
    };
    export(&target, &ctx.config_file).await?;
    println!("{} {}", "Wrote".green(), target.path().display());
    Ok(true)
}

/// Write the template to `target`; the active configuration is never
/// overwritten.
pub async fn export(target: &File, active: &File) -> Result<(), SyncError> {
    if same_path(target, active) {
        return Err(SyncError::ConfigError(format!(
            "Refusing to overwrite the active configuration {}",
            active.path().display()
        )));
    }
    target.write_string(CONFIG_TEMPLATE).await
}

fn same_path(a: &File, b: &File) -> bool {
    match (std::fs::canonicalize(a.path()), std::fs::canonicalize(b.path())) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.path() == b.path(),
    }
}
