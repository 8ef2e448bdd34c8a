//! Schema migration command.

use anyhow::Result;
use clap::Args;

use strand_core::db::Database;

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct MigrateArgs {
    /// Only report applied and pending migrations
    #[arg(long)]
    status: bool,
}

pub async fn execute(args: MigrateArgs, db: &Database, format: OutputFormat) -> Result<()> {
    if !args.status {
        db.migrate().await?;
    }
    let status = db.migration_status().await?;

    match format {
        OutputFormat::Table => {
            output::print_header("Migrations");
            output::print_detail("Applied", &join(&status.applied));
            output::print_detail("Pending", &join(&status.pending));
            if status.is_current() {
                output::print_success("Schema is up to date");
            } else {
                output::print_info("Run `strand migrate` to apply pending migrations");
            }
        }
        _ => output::print_item(&status, format)?,
    }
    Ok(())
}

fn join(versions: &[i64]) -> String {
    if versions.is_empty() {
        return "-".to_string();
    }
    versions
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
