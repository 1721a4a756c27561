//! Run history and registered sources

use anyhow::Result;
use colored::*;

use super::ingest::status_label;
use crate::cli::{RunsArgs, open_pool};
use crate::config::Config;
use crate::config::repository::{runs, sources};

pub async fn handle_runs_command(args: RunsArgs, config: &Config) -> Result<()> {
    let pool = open_pool(config).await?;
    let runs = runs::list_runs(&pool, args.source.as_deref(), args.limit).await?;

    if runs.is_empty() {
        println!("No ingestion runs recorded");
        return Ok(());
    }

    for run in &runs {
        println!(
            "{}  {:<8}  {}  {}",
            run.ran_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            status_label(run.status),
            run.source_id.cyan(),
            run.message
        );
        log::debug!("  run {} ({}), {} warning(s)", run.id, run.parser_name, run.warnings.len());
        for warning in &run.warnings {
            println!("    {} {}", "-".yellow(), warning);
        }
    }
    Ok(())
}

pub async fn handle_sources_command(config: &Config) -> Result<()> {
    let pool = open_pool(config).await?;
    let sources = sources::list_sources(&pool).await?;

    if sources.is_empty() {
        println!("No sources registered. Ingest a workbook to register one.");
        return Ok(());
    }

    for source in &sources {
        let state = if source.enabled {
            "enabled".bright_green()
        } else {
            "disabled".red()
        };
        let last = source
            .last_ingested
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{} -> {} [{}] last ingested {} ({})",
            source.source_id.cyan().bold(),
            source.dataset_id.bright_green(),
            state,
            last,
            source.file_name.as_deref().unwrap_or("-").dimmed()
        );
    }
    Ok(())
}
