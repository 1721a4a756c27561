//! One-shot ingestion of a workbook

use anyhow::Result;
use colored::*;

use crate::cli::{IngestArgs, coordinator, open_pool, resolve_source};
use crate::config::Config;
use crate::config::repository::sources;
use crate::ingest::{RunOutcome, RunStatus};

pub async fn handle_ingest_command(args: IngestArgs, config: &Config) -> Result<()> {
    if !args.file.exists() {
        anyhow::bail!("Workbook does not exist: {}", args.file.display());
    }

    let pool = open_pool(config).await?;
    let source = resolve_source(&pool, config, &args.source, args.dataset.as_deref()).await?;
    sources::upsert_source(&pool, &source).await?;

    println!(
        "Ingesting {} into {} (source {})",
        args.file.display().to_string().cyan(),
        source.dataset_id.bright_green().bold(),
        source.source_id.dimmed()
    );

    let outcome = coordinator(pool, config).ingest_file(&source, &args.file).await?;
    print_outcome(&outcome);

    if !outcome.run.status.publishes() {
        anyhow::bail!("Ingestion failed: {}", outcome.run.message);
    }
    Ok(())
}

pub(crate) fn status_label(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Success => status.as_str().bright_green().bold(),
        RunStatus::Warning => status.as_str().yellow().bold(),
        RunStatus::Error => status.as_str().red().bold(),
    }
}

/// Print a run outcome with its warnings
pub(crate) fn print_outcome(outcome: &RunOutcome) {
    let run = &outcome.run;
    println!();
    println!("{} {}", "Run:".bold(), run.id.dimmed());
    println!("{} {}", "Status:".bold(), status_label(run.status));
    println!("{} {}", "Result:".bold(), run.message);

    if !outcome.years.is_empty() {
        let years: Vec<String> = outcome.years.iter().map(|y| y.to_string()).collect();
        println!("{} {}", "Years:".bold(), years.join(", ").cyan());
    }

    if let Some(overview) = &outcome.overview {
        for summary in &overview.years {
            let last = summary
                .last_month
                .map(|m| m.label().to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} {} month(s), last {}",
                summary.year.to_string().cyan(),
                summary.month_count,
                last
            );
        }
    }

    if !run.warnings.is_empty() {
        println!();
        println!("{} ({})", "Warnings".yellow().bold(), run.warnings.len());
        for warning in &run.warnings {
            println!("  {} {}", "-".yellow(), warning);
        }
    }
}
