//! Parse-only check of a workbook's year coverage
//!
//! Nothing is stored. Label overrides from the database are not applied,
//! only the configured rule table.

use anyhow::{Context, Result};
use chrono::Utc;
use colored::*;

use crate::balance::aggregate::{AggregateInput, aggregate};
use crate::balance::workbook;
use crate::balance::{BalanceOverview, SourceIdentity, process_workbook};
use crate::cli::VerifyArgs;
use crate::config::Config;

const MWH_PER_GWH: f64 = 1000.0;

pub async fn handle_verify_command(args: VerifyArgs, config: &Config) -> Result<()> {
    if !args.file.exists() {
        anyhow::bail!("Workbook does not exist: {}", args.file.display());
    }
    if args.from > args.to {
        anyhow::bail!("--from {} is after --to {}", args.from, args.to);
    }

    let identity = SourceIdentity {
        dataset_id: config.source.dataset_id.clone(),
        source_id: config.source.source_id.clone(),
    };
    let locator = config.locator_settings();
    let mapper = config.label_mapper();
    let retry = config.retry_policy();
    let path = args.file.clone();

    let overview = tokio::task::spawn_blocking(move || -> Result<BalanceOverview> {
        let workbook = workbook::load(&path, retry)?;
        let parsed = process_workbook(&workbook, &identity, &locator, &mapper, Utc::now());
        Ok(aggregate(AggregateInput {
            dataset_id: &identity.dataset_id,
            source_id: &identity.source_id,
            run_id: None,
            published_at: Utc::now(),
            energy: &parsed.energy,
            sales: &parsed.sales,
            warnings: &parsed.warnings,
        }))
    })
    .await
    .context("Verification task failed")??;

    let missing = report(&overview, args.from, args.to);

    if !overview.warnings.is_empty() {
        println!();
        println!("{} ({})", "Warnings".yellow().bold(), overview.warnings.len());
        for warning in &overview.warnings {
            println!("  {} {}", "-".yellow(), warning);
        }
    }

    if !missing.is_empty() {
        let years: Vec<String> = missing.iter().map(|y| y.to_string()).collect();
        anyhow::bail!("Missing year(s): {}", years.join(", "));
    }
    Ok(())
}

/// Print one line per expected year; returns the years without data
fn report(overview: &BalanceOverview, from: i32, to: i32) -> Vec<i32> {
    let mut missing = Vec::new();

    for year in from..=to {
        let Some(summary) = overview.summary(year) else {
            println!("{} {}", year.to_string().cyan(), "MISSING".red().bold());
            missing.push(year);
            continue;
        };

        let last = summary
            .last_month
            .map(|m| m.label().to_string())
            .unwrap_or_else(|| "-".to_string());
        let totals = &summary.totals;
        println!(
            "{} {} (months={}, last={}) | GWh: regulados={:.1} libres={:.1} coes={:.1} servicios_aux={:.1} perdidas={:.1}",
            year.to_string().cyan(),
            "OK".bright_green().bold(),
            summary.month_count,
            last,
            totals.regulados_mwh / MWH_PER_GWH,
            totals.libres_mwh / MWH_PER_GWH,
            totals.coes_mwh / MWH_PER_GWH,
            totals.servicios_aux_mwh / MWH_PER_GWH,
            totals.perdidas_mwh / MWH_PER_GWH,
        );

        for point in overview.energy(Some(year)) {
            log::debug!(
                "  {}: total={:.1} (reg={:.1}, lib={:.1}, coes={:.1})",
                point.label,
                point.total_mercados_mwh,
                point.regulados_mwh,
                point.libres_mwh,
                point.coes_mwh
            );
        }
    }

    missing
}
