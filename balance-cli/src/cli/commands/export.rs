//! Export the published snapshot to an Excel workbook

use std::path::Path;

use anyhow::{Context, Result};
use colored::*;
use rust_xlsxwriter::*;

use crate::balance::BalanceOverview;
use crate::cli::{ExportArgs, restored_overview};
use crate::config::Config;

pub async fn handle_export_command(args: ExportArgs, config: &Config) -> Result<()> {
    let (source, overview) = restored_overview(config, &args.source).await?;
    let Some(overview) = overview else {
        anyhow::bail!("Nothing to export: source '{}' has no ingested data", source.source_id);
    };

    export_overview_to_excel(&overview, &args.output)?;
    println!(
        "Exported {} month(s) of {} to {}",
        overview.energy.len(),
        overview.dataset_id.bright_green().bold(),
        args.output.display().to_string().cyan()
    );
    Ok(())
}

/// Write energy, sales and per-year summary sheets
pub fn export_overview_to_excel(overview: &BalanceOverview, path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();

    create_energy_sheet(&mut workbook, overview, &bold)?;
    create_sales_sheet(&mut workbook, overview, &bold)?;
    create_years_sheet(&mut workbook, overview, &bold)?;

    workbook
        .save(path)
        .with_context(|| format!("Failed to save Excel file: {}", path.display()))?;

    log::info!("Balance overview exported to: {}", path.display());
    Ok(())
}

fn write_headers(sheet: &mut Worksheet, headers: &[&str], format: &Format) -> Result<()> {
    for (col, header) in headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, format)?;
        sheet.set_column_width(col as u16, 16)?;
    }
    Ok(())
}

fn create_energy_sheet(workbook: &mut Workbook, overview: &BalanceOverview, bold: &Format) -> Result<()> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Energy")?;
    write_headers(
        sheet,
        &[
            "Year",
            "Month",
            "Regulados MWh",
            "Libres MWh",
            "COES MWh",
            "Perdidas MWh",
            "Servicios aux MWh",
            "Venta energia MWh",
            "Total mercados MWh",
            "Warnings",
        ],
        bold,
    )?;

    for (i, point) in overview.energy.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_number(row, 0, point.year as f64)?;
        sheet.write_string(row, 1, &point.label)?;
        sheet.write_number(row, 2, point.regulados_mwh)?;
        sheet.write_number(row, 3, point.libres_mwh)?;
        sheet.write_number(row, 4, point.coes_mwh)?;
        sheet.write_number(row, 5, point.perdidas_mwh)?;
        sheet.write_number(row, 6, point.servicios_aux_mwh)?;
        sheet.write_number(row, 7, point.venta_energia_mwh)?;
        sheet.write_number(row, 8, point.total_mercados_mwh)?;
        sheet.write_string(row, 9, point.warnings.join("\n"))?;
    }
    Ok(())
}

fn create_sales_sheet(workbook: &mut Workbook, overview: &BalanceOverview, bold: &Format) -> Result<()> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Sales")?;
    write_headers(
        sheet,
        &[
            "Year", "Month", "Regulados S/", "Libres S/", "COES spot S/", "Otros S/", "Venta S/",
            "Total S/",
        ],
        bold,
    )?;

    for (i, point) in overview.sales.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_number(row, 0, point.year as f64)?;
        sheet.write_string(row, 1, &point.label)?;
        sheet.write_number(row, 2, point.regulados)?;
        sheet.write_number(row, 3, point.libres)?;
        sheet.write_number(row, 4, point.coes_spot)?;
        sheet.write_number(row, 5, point.otros)?;
        sheet.write_number(row, 6, point.venta)?;
        sheet.write_number(row, 7, point.total)?;
    }
    Ok(())
}

fn create_years_sheet(workbook: &mut Workbook, overview: &BalanceOverview, bold: &Format) -> Result<()> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Years")?;
    write_headers(
        sheet,
        &["Year", "Months", "Last month", "Venta energia MWh", "Total mercados MWh", "Warnings"],
        bold,
    )?;

    for (i, summary) in overview.years.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_number(row, 0, summary.year as f64)?;
        sheet.write_number(row, 1, summary.month_count as f64)?;
        sheet.write_string(row, 2, summary.last_month.map(|m| m.label()).unwrap_or("-"))?;
        sheet.write_number(row, 3, summary.totals.venta_energia_mwh)?;
        sheet.write_number(row, 4, summary.totals.total_mercados_mwh)?;
        sheet.write_string(row, 5, summary.warnings.join("\n"))?;
    }
    Ok(())
}
