//! Read-only views over a source's published snapshot

use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;

use crate::balance::{EnergyPoint, SalesPoint};
use crate::cli::{OutputFormat, ShowArgs, SourceArgs, restored_overview};
use crate::config::Config;

pub async fn handle_years_command(args: SourceArgs, config: &Config) -> Result<()> {
    let (source, overview) = restored_overview(config, &args).await?;
    let Some(overview) = overview else {
        println!("No data ingested yet for source {}", source.source_id.cyan());
        return Ok(());
    };

    for year in overview.years() {
        match overview.summary(year) {
            Some(summary) => println!(
                "{} {} month(s), last {}",
                year.to_string().cyan(),
                summary.month_count,
                summary
                    .last_month
                    .map(|m| m.label().to_string())
                    .unwrap_or_else(|| "-".to_string())
            ),
            None => println!("{} {}", year.to_string().cyan(), "sales only".dimmed()),
        }
    }
    Ok(())
}

pub async fn handle_show_command(args: ShowArgs, config: &Config) -> Result<()> {
    let (source, overview) = restored_overview(config, &args.source).await?;
    let Some(overview) = overview else {
        println!("No data ingested yet for source {}", source.source_id.cyan());
        return Ok(());
    };

    if let Some(year) = args.year {
        if !overview.years().contains(&year) {
            anyhow::bail!("No data for year {} in dataset '{}'", year, overview.dataset_id);
        }
    }

    let output = if args.sales {
        let points = overview.sales(args.year);
        match args.format {
            OutputFormat::Json => to_json(&points)?,
            OutputFormat::Csv => to_csv(&sales_rows(&points, raw))?,
            OutputFormat::Table => to_table(&sales_rows(&points, fixed)),
        }
    } else {
        let points = overview.energy(args.year);
        match args.format {
            OutputFormat::Json => to_json(&points)?,
            OutputFormat::Csv => to_csv(&energy_rows(&points, raw))?,
            OutputFormat::Table => to_table(&energy_rows(&points, fixed)),
        }
    };

    if args.format == OutputFormat::Table {
        println!(
            "Dataset {} (run {}, published {})",
            overview.dataset_id.bright_green().bold(),
            overview.run_id.as_deref().unwrap_or("-").dimmed(),
            overview.published_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }
    print!("{}", output);
    Ok(())
}

/// Header plus already-formatted rows
struct Rows {
    headers: Vec<&'static str>,
    rows: Vec<Vec<String>>,
}

fn raw(value: f64) -> String {
    value.to_string()
}

fn fixed(value: f64) -> String {
    format!("{:.2}", value)
}

fn energy_rows(points: &[&EnergyPoint], number: fn(f64) -> String) -> Rows {
    Rows {
        headers: vec![
            "year",
            "month",
            "regulados_mwh",
            "libres_mwh",
            "coes_mwh",
            "perdidas_mwh",
            "servicios_aux_mwh",
            "venta_energia_mwh",
            "total_mercados_mwh",
            "warnings",
        ],
        rows: points
            .iter()
            .map(|p| {
                vec![
                    p.year.to_string(),
                    p.label.clone(),
                    number(p.regulados_mwh),
                    number(p.libres_mwh),
                    number(p.coes_mwh),
                    number(p.perdidas_mwh),
                    number(p.servicios_aux_mwh),
                    number(p.venta_energia_mwh),
                    number(p.total_mercados_mwh),
                    p.warnings.len().to_string(),
                ]
            })
            .collect(),
    }
}

fn sales_rows(points: &[&SalesPoint], number: fn(f64) -> String) -> Rows {
    Rows {
        headers: vec![
            "year",
            "month",
            "regulados",
            "libres",
            "coes_spot",
            "otros",
            "venta",
            "total",
            "warnings",
        ],
        rows: points
            .iter()
            .map(|p| {
                vec![
                    p.year.to_string(),
                    p.label.clone(),
                    number(p.regulados),
                    number(p.libres),
                    number(p.coes_spot),
                    number(p.otros),
                    number(p.venta),
                    number(p.total),
                    p.warnings.len().to_string(),
                ]
            })
            .collect(),
    }
}

fn to_json<T: Serialize>(points: &T) -> Result<String> {
    let mut json = serde_json::to_string_pretty(points).context("Failed to format JSON output")?;
    json.push('\n');
    Ok(json)
}

fn to_csv(rows: &Rows) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&rows.headers)?;
    for row in &rows.rows {
        writer.write_record(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV output: {}", e.error()))?;
    String::from_utf8(bytes).context("CSV output is not valid UTF-8")
}

fn to_table(rows: &Rows) -> String {
    if rows.rows.is_empty() {
        return "No data\n".to_string();
    }

    let widths: Vec<usize> = rows
        .headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            rows.rows
                .iter()
                .map(|row| row[i].len())
                .chain(std::iter::once(header.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    let header: Vec<String> = rows
        .headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{:>w$}", h, w = *w))
        .collect();
    out.push_str(&header.join("  "));
    out.push('\n');

    for row in &rows.rows {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{:>w$}", cell, w = *w))
            .collect();
        out.push_str(&line.join("  "));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::Month;

    fn point() -> EnergyPoint {
        EnergyPoint {
            year: 2025,
            month: Month::Mar,
            label: "Mar".to_string(),
            regulados_mwh: 100.5,
            libres_mwh: 200.0,
            coes_mwh: 10.0,
            perdidas_mwh: 5.0,
            servicios_aux_mwh: 1.0,
            venta_energia_mwh: 300.5,
            total_mercados_mwh: 310.5,
            warnings: vec!["[Cell parse] 2025 Mar: bad".to_string()],
        }
    }

    #[test]
    fn test_energy_csv() {
        let point = point();
        let csv = to_csv(&energy_rows(&[&point], raw)).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some(
                "year,month,regulados_mwh,libres_mwh,coes_mwh,perdidas_mwh,servicios_aux_mwh,venta_energia_mwh,total_mercados_mwh,warnings"
            )
        );
        assert_eq!(lines.next(), Some("2025,Mar,100.5,200,10,5,1,300.5,310.5,1"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_table_aligns_columns() {
        let point = point();
        let table = to_table(&energy_rows(&[&point], fixed));
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), lines[1].len());
        assert!(lines[1].contains("300.50"));

        assert_eq!(to_table(&sales_rows(&[], fixed)), "No data\n");
    }
}
