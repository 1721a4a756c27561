//! Ingestion and normalization engine
//!
//! Every stage here is a pure transform over a decoded [`Workbook`]:
//! resolve one sheet per year, locate its tables, map row labels, build facts.
//! Nothing in this module keeps state between runs.

pub mod aggregate;
pub mod facts;
pub mod labels;
pub mod locator;
pub mod months;
pub mod numbers;
pub mod version;
pub mod warnings;
pub mod workbook;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

pub use aggregate::{BalanceOverview, EnergyPoint, SalesPoint};
pub use facts::{Fact, FactBuilder, FactContext, SalesCode, SalesFact};
pub use labels::{CategoryCode, LabelMapper};
pub use locator::{LocatorSettings, TableLocator};
pub use months::Month;
pub use version::Resolution;
pub use warnings::{IngestWarning, WarningKind};
pub use workbook::{Workbook, WorkbookError};

/// Name recorded on runs produced by this engine
pub const PARSER_NAME: &str = "balance-workbook";

/// Who the facts belong to
#[derive(Debug, Clone)]
pub struct SourceIdentity {
    pub dataset_id: String,
    pub source_id: String,
}

/// Result of running the engine over one workbook
#[derive(Debug, Clone, Default)]
pub struct ParsedWorkbook {
    pub resolution: Resolution,
    pub energy: Vec<Fact<CategoryCode>>,
    pub sales: Vec<SalesFact>,
    pub warnings: Vec<IngestWarning>,
    /// Observed months of each year's energy table
    pub observed: BTreeMap<i32, Vec<Month>>,
}

impl ParsedWorkbook {
    /// Years that produced at least one energy fact
    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.energy.iter().map(|f| f.year()).collect();
        years.sort_unstable();
        years.dedup();
        years
    }

    /// Any finding, skipped sheets included, downgrades the run to WARNING
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Resolve, locate and extract every year of a workbook
pub fn process_workbook(
    workbook: &Workbook,
    identity: &SourceIdentity,
    locator_settings: &LocatorSettings,
    mapper: &LabelMapper,
    updated_at: DateTime<Utc>,
) -> ParsedWorkbook {
    let resolution = version::resolve(&workbook.sheet_names());
    let mut parsed = ParsedWorkbook::default();

    for name in &resolution.skipped {
        parsed.warnings.push(IngestWarning::new(
            WarningKind::SheetSkipped,
            format!("sheet '{}' has no year in its name", name),
        ));
    }
    for error in &resolution.errors {
        parsed
            .warnings
            .push(IngestWarning::new(WarningKind::Resolution, error.to_string()).for_year(error.year));
    }

    let locator = TableLocator::new(locator_settings);
    for (year, winner) in &resolution.winners {
        let Some(sheet) = workbook.sheet(&winner.sheet_name) else {
            continue;
        };

        let energy_layout = match locator.locate_energy(sheet, *year) {
            Ok(layout) => layout,
            Err(e) => {
                log::warn!("{}", e);
                parsed
                    .warnings
                    .push(IngestWarning::new(WarningKind::TableNotFound, e.to_string()).for_year(*year));
                continue;
            }
        };

        let ctx = FactContext {
            dataset_id: identity.dataset_id.clone(),
            source_id: identity.source_id.clone(),
            year: *year,
            updated_at,
        };
        let builder = FactBuilder::new(&ctx, mapper);

        let energy = builder.build_energy(sheet, &energy_layout);
        log::info!(
            "Year {} ({}): {} energy facts, months observed: {}",
            year,
            sheet.name,
            energy.facts.len(),
            energy.observed_months.len()
        );
        parsed.observed.insert(*year, energy.observed_months);
        parsed.energy.extend(energy.facts);
        parsed.warnings.extend(energy.warnings);

        if let Some(sales_layout) = locator.locate_sales(sheet, &energy_layout) {
            let sales = builder.build_sales(sheet, &sales_layout);
            log::debug!("Year {} ({}): {} sales facts", year, sheet.name, sales.facts.len());
            parsed.sales.extend(sales.facts);
            parsed.warnings.extend(sales.warnings);
        }
    }

    parsed.resolution = resolution;
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::workbook::{Cell, Sheet};

    fn t(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn n(v: f64) -> Cell {
        Cell::Number(v)
    }

    fn year_sheet(name: &str, year: i32, regulados: f64) -> Sheet {
        Sheet::new(
            name,
            vec![
                vec![t(&format!("BALANCE DE ENERGÍA EN MWh - AÑO {}", year))],
                vec![t("DESCRIPCIÓN"), t("Ene"), t("Feb"), t("Mar")],
                vec![t("A emp. Distribuidoras"), n(regulados), n(regulados), n(regulados)],
                vec![t("A clientes Libres"), n(1.0), n(2.0), n(3.0)],
                vec![t("COES"), n(4.0), n(5.0), n(6.0)],
            ],
        )
    }

    fn identity() -> SourceIdentity {
        SourceIdentity {
            dataset_id: "balance".to_string(),
            source_id: "balance-xlsx".to_string(),
        }
    }

    fn process(workbook: &Workbook) -> ParsedWorkbook {
        process_workbook(
            workbook,
            &identity(),
            &LocatorSettings::default(),
            &LabelMapper::default(),
            Utc::now(),
        )
    }

    #[test]
    fn test_winning_revision_supplies_facts() {
        let workbook = Workbook::new(vec![
            year_sheet("2020", 2020, 100.0),
            year_sheet("2020 R1", 2020, 200.0),
            year_sheet("2020 R2", 2020, 300.0),
            Sheet::new("Perfil", vec![]),
        ]);
        let parsed = process(&workbook);

        assert_eq!(parsed.years(), vec![2020]);
        assert!(
            parsed
                .energy
                .iter()
                .filter(|f| f.metric == CategoryCode::Regulados)
                .all(|f| f.value == 300.0)
        );
        assert_eq!(parsed.energy.len(), 9);
        // Only the skipped sheet is reported, and it still degrades the run
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.warnings[0].kind, WarningKind::SheetSkipped);
        assert!(parsed.is_degraded());
    }

    #[test]
    fn test_missing_table_excludes_year_only() {
        let workbook = Workbook::new(vec![
            year_sheet("2021", 2021, 10.0),
            Sheet::new("2022", vec![vec![t("Notas")]]),
        ]);
        let parsed = process(&workbook);
        assert_eq!(parsed.years(), vec![2021]);
        assert!(parsed.is_degraded());
        assert!(
            parsed
                .warnings
                .iter()
                .any(|w| w.kind == WarningKind::TableNotFound && w.year == Some(2022))
        );
    }

    #[test]
    fn test_no_year_tokens_yields_nothing() {
        let workbook = Workbook::new(vec![Sheet::new("Resumen", vec![]), Sheet::new("R", vec![])]);
        let parsed = process(&workbook);
        assert!(parsed.years().is_empty());
        assert!(parsed.energy.is_empty());
        assert!(parsed.resolution.winners.is_empty());
    }
}
