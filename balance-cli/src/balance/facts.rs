//! Fact records and the builder that extracts them from a located table

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Display};
use std::hash::Hash;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::labels::{CategoryCode, LabelMapper, LabelMatch, Section, detect_section, normalize_label};
use super::locator::TableLayout;
use super::months::Month;
use super::numbers::ParsedNumber;
use super::warnings::{IngestWarning, WarningKind};
use super::workbook::Sheet;

/// Which table of the report a fact comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Energy,
    Sales,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Energy => "energy",
            TableKind::Sales => "sales",
        }
    }
}

/// A measured quantity of one table
pub trait Metric: Copy + Ord + Hash + Debug + Display + Send + Sync + 'static {
    const TABLE: TableKind;
    const UNIT: &'static str;

    fn code(&self) -> &'static str;
    fn from_code(code: &str) -> Option<Self>;
}

impl Metric for CategoryCode {
    const TABLE: TableKind = TableKind::Energy;
    const UNIT: &'static str = "MWh";

    fn code(&self) -> &'static str {
        CategoryCode::code(self)
    }

    fn from_code(code: &str) -> Option<Self> {
        CategoryCode::from_code(code)
    }
}

/// Categories of the currency-denominated sales table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SalesCode {
    Regulados,
    Libres,
    CoesSpot,
    Otros,
}

impl SalesCode {
    pub const ALL: [SalesCode; 4] = [
        SalesCode::Regulados,
        SalesCode::Libres,
        SalesCode::CoesSpot,
        SalesCode::Otros,
    ];
}

impl Display for SalesCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl Metric for SalesCode {
    const TABLE: TableKind = TableKind::Sales;
    const UNIT: &'static str = "S/";

    fn code(&self) -> &'static str {
        match self {
            SalesCode::Regulados => "REGULADOS",
            SalesCode::Libres => "LIBRES",
            SalesCode::CoesSpot => "COES_SPOT",
            SalesCode::Otros => "OTROS",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        let upper = code.trim().to_uppercase();
        Self::ALL.into_iter().find(|c| c.code() == upper)
    }
}

/// Where a fact's value was read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub sheet_name: String,
    /// A1-style reference of the value cell
    pub cell: String,
    /// Row label as written in the sheet
    pub label: String,
}

/// One (metric, month, year) value of a source, immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact<M = CategoryCode> {
    pub dataset_id: String,
    pub source_id: String,
    /// First day of the reporting month
    pub date: NaiveDate,
    pub metric: M,
    pub value: f64,
    pub unit: String,
    pub updated_at: DateTime<Utc>,
    pub provenance: Provenance,
}

pub type SalesFact = Fact<SalesCode>;

impl<M: Metric> Fact<M> {
    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn month(&self) -> Month {
        // Dates are always built from a Month, so the index is in range
        Month::from_index(self.date.month()).unwrap_or(Month::Ene)
    }
}

/// Identity shared by every fact of one sheet
#[derive(Debug, Clone)]
pub struct FactContext {
    pub dataset_id: String,
    pub source_id: String,
    pub year: i32,
    pub updated_at: DateTime<Utc>,
}

/// Facts and findings from one table
#[derive(Debug, Clone)]
pub struct TableFacts<M> {
    pub facts: Vec<Fact<M>>,
    pub warnings: Vec<IngestWarning>,
    /// Months with at least one value in a mapped row
    pub observed_months: Vec<Month>,
}

/// How a body row participates in the table
enum RowClass<M> {
    Mapped(M),
    /// Recognized but intentionally not extracted
    Skip(&'static str),
    Ambiguous(Vec<CategoryCode>),
    Unmapped,
}

/// Converts located table cells into facts, collecting warnings instead of failing
pub struct FactBuilder<'a> {
    ctx: &'a FactContext,
    mapper: &'a LabelMapper,
}

impl<'a> FactBuilder<'a> {
    pub fn new(ctx: &'a FactContext, mapper: &'a LabelMapper) -> Self {
        FactBuilder { ctx, mapper }
    }

    /// Extract energy facts (MWh)
    pub fn build_energy(&self, sheet: &Sheet, layout: &TableLayout) -> TableFacts<CategoryCode> {
        self.build_table(sheet, layout, |label, section| match self.mapper.classify(label) {
            // Market rows under "COMPRA DE ENERGIA" are purchases, not sales volume
            LabelMatch::Category(c) if c.is_market() && section == Some(Section::Purchases) => {
                RowClass::Skip("purchase section")
            }
            LabelMatch::Category(c) => RowClass::Mapped(c),
            LabelMatch::Ambiguous(cs) => RowClass::Ambiguous(cs),
            LabelMatch::Unmapped => RowClass::Unmapped,
        })
    }

    /// Extract sales facts (currency)
    pub fn build_sales(&self, sheet: &Sheet, layout: &TableLayout) -> TableFacts<SalesCode> {
        self.build_table(sheet, layout, |label, _| {
            if label == "OTROS" || label.starts_with("OTROS ") {
                return RowClass::Mapped(SalesCode::Otros);
            }
            match self.mapper.classify(label) {
                LabelMatch::Category(CategoryCode::Regulados) => RowClass::Mapped(SalesCode::Regulados),
                LabelMatch::Category(CategoryCode::Libres) => RowClass::Mapped(SalesCode::Libres),
                LabelMatch::Category(CategoryCode::CoesSpot) => RowClass::Mapped(SalesCode::CoesSpot),
                LabelMatch::Ambiguous(cs) => RowClass::Ambiguous(cs),
                _ => RowClass::Unmapped,
            }
        })
    }

    fn build_table<M: Metric>(
        &self,
        sheet: &Sheet,
        layout: &TableLayout,
        classify: impl Fn(&str, Option<Section>) -> RowClass<M>,
    ) -> TableFacts<M> {
        let year = self.ctx.year;
        let mut warnings = Vec::new();
        let mut section = None;
        let mut mapped_rows: Vec<(usize, M, String)> = Vec::new();

        for row in layout.body.clone() {
            let raw = sheet.cell(row, layout.label_col).as_text();
            let normalized = normalize_label(raw);
            if normalized.is_empty() {
                continue;
            }
            if let Some(s) = detect_section(&normalized) {
                section = Some(s);
                continue;
            }

            let at = sheet.cell_ref(row, layout.label_col);
            match classify(&normalized, section) {
                RowClass::Mapped(metric) => mapped_rows.push((row, metric, raw.trim().to_string())),
                RowClass::Skip(reason) => {
                    log::debug!("{} {}: skipping row '{}' at {} ({})", sheet.name, year, raw.trim(), at, reason);
                }
                RowClass::Ambiguous(categories) => {
                    let codes: Vec<&str> = categories.iter().map(|c| c.code()).collect();
                    warnings.push(
                        IngestWarning::new(
                            WarningKind::AmbiguousLabel,
                            format!(
                                "row '{}' (normalized '{}') at {} matches {} equally; excluded",
                                raw.trim(),
                                normalized,
                                at,
                                codes.join(", ")
                            ),
                        )
                        .for_year(year),
                    );
                }
                RowClass::Unmapped => {
                    warnings.push(
                        IngestWarning::new(
                            WarningKind::UnmappedLabel,
                            format!(
                                "row '{}' (normalized '{}') at {} is not mapped to a {} category",
                                raw.trim(),
                                normalized,
                                at,
                                M::TABLE.as_str()
                            ),
                        )
                        .for_year(year),
                    );
                }
            }
        }

        let observed: BTreeSet<Month> = layout
            .months
            .iter()
            .filter(|(_, col)| {
                mapped_rows.iter().any(|(row, _, _)| {
                    matches!(sheet.cell(*row, **col).as_number(), ParsedNumber::Value(_))
                })
            })
            .map(|(month, _)| *month)
            .collect();

        let mut values: BTreeMap<(M, Month), (f64, Provenance)> = BTreeMap::new();
        for (row, metric, label) in &mapped_rows {
            let mut overridden: Vec<Month> = Vec::new();
            for (month, col) in &layout.months {
                let cell = sheet.cell(*row, *col);
                let at = sheet.cell_ref(*row, *col);
                match cell.as_number() {
                    ParsedNumber::Value(value) => {
                        let provenance = Provenance {
                            sheet_name: sheet.name.clone(),
                            cell: at,
                            label: label.clone(),
                        };
                        if values.insert((*metric, *month), (value, provenance)).is_some() {
                            overridden.push(*month);
                        }
                    }
                    ParsedNumber::Missing => {
                        // Columns nobody reported yet are summarized once below
                        if observed.contains(month) {
                            warnings.push(
                                IngestWarning::new(
                                    WarningKind::CellParse,
                                    format!("{} value missing at {}; skipped", metric, at),
                                )
                                .for_year(year)
                                .for_month(*month),
                            );
                        }
                    }
                    ParsedNumber::Invalid => {
                        warnings.push(
                            IngestWarning::new(
                                WarningKind::CellParse,
                                format!(
                                    "{} value {} at {} is not numeric; skipped",
                                    metric,
                                    cell.describe(),
                                    at
                                ),
                            )
                            .for_year(year)
                            .for_month(*month),
                        );
                    }
                }
            }

            if !overridden.is_empty() {
                let months: Vec<&str> = overridden.iter().map(|m| m.label()).collect();
                let mut warning = IngestWarning::new(
                    WarningKind::DuplicateCell,
                    format!(
                        "row '{}' repeats {} for {}; last value kept",
                        label,
                        metric,
                        months.join(", ")
                    ),
                )
                .for_year(year);
                if let [month] = overridden.as_slice() {
                    warning = warning.for_month(*month);
                }
                warnings.push(warning);
            }
        }

        let unreported: Vec<&str> = layout
            .months
            .keys()
            .filter(|m| !observed.contains(m))
            .map(|m| m.label())
            .collect();
        if !mapped_rows.is_empty() && !unreported.is_empty() {
            warnings.push(
                IngestWarning::new(
                    WarningKind::MonthsWithoutData,
                    format!("{} table has no data for {}", M::TABLE.as_str(), unreported.join(", ")),
                )
                .for_year(year),
            );
        }

        let mut facts: Vec<Fact<M>> = values
            .into_iter()
            .filter_map(|((metric, month), (value, provenance))| {
                let date = NaiveDate::from_ymd_opt(year, month.index(), 1)?;
                Some(Fact {
                    dataset_id: self.ctx.dataset_id.clone(),
                    source_id: self.ctx.source_id.clone(),
                    date,
                    metric,
                    value,
                    unit: M::UNIT.to_string(),
                    updated_at: self.ctx.updated_at,
                    provenance,
                })
            })
            .collect();
        facts.sort_by(|a, b| a.date.cmp(&b.date).then(a.metric.cmp(&b.metric)));

        TableFacts {
            facts,
            warnings,
            observed_months: observed.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::locator::{LocatorSettings, TableLocator};
    use crate::balance::workbook::Cell;

    fn t(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn n(v: f64) -> Cell {
        Cell::Number(v)
    }

    fn ctx(year: i32) -> FactContext {
        FactContext {
            dataset_id: "balance".to_string(),
            source_id: "balance-xlsx".to_string(),
            year,
            updated_at: Utc::now(),
        }
    }

    fn energy_facts(sheet: &Sheet, year: i32) -> TableFacts<CategoryCode> {
        let settings = LocatorSettings::default();
        let layout = TableLocator::new(&settings).locate_energy(sheet, year).unwrap();
        let context = ctx(year);
        let mapper = LabelMapper::default();
        FactBuilder::new(&context, &mapper).build_energy(sheet, &layout)
    }

    fn find(facts: &TableFacts<CategoryCode>, metric: CategoryCode, month: Month) -> Option<f64> {
        facts
            .facts
            .iter()
            .find(|f| f.metric == metric && f.month() == month)
            .map(|f| f.value)
    }

    #[test]
    fn test_non_numeric_march_is_skipped_with_warning() {
        let sheet = Sheet::new(
            "2024",
            vec![
                vec![t("BALANCE DE ENERGÍA EN MWh - AÑO 2024")],
                vec![t("DESCRIPCIÓN"), t("Ene"), t("Feb"), t("Mar")],
                vec![t("A emp. Distribuidoras"), n(900.0), n(950.0), t("pendiente")],
                vec![t("A clientes Libres"), n(400.0), n(420.0), n(430.0)],
                vec![t("COES"), n(150.0), n(155.0), n(160.0)],
            ],
        );
        let result = energy_facts(&sheet, 2024);

        assert_eq!(find(&result, CategoryCode::Regulados, Month::Mar), None);
        assert_eq!(find(&result, CategoryCode::Regulados, Month::Feb), Some(950.0));
        assert_eq!(find(&result, CategoryCode::Libres, Month::Mar), Some(430.0));
        assert_eq!(find(&result, CategoryCode::CoesSpot, Month::Mar), Some(160.0));
        assert_eq!(result.facts.len(), 8);

        let parse_warnings: Vec<_> = result
            .warnings
            .iter()
            .filter(|w| w.kind == WarningKind::CellParse)
            .collect();
        assert_eq!(parse_warnings.len(), 1);
        assert_eq!(parse_warnings[0].year, Some(2024));
        assert_eq!(parse_warnings[0].month, Some(Month::Mar));
        assert!(parse_warnings[0].message.contains("REGULADOS"));
    }

    #[test]
    fn test_unreported_months_are_summarized() {
        let sheet = Sheet::new(
            "Balance 2025",
            vec![
                vec![t("BALANCE DE ENERGÍA EN MWh - AÑO 2025")],
                vec![],
                vec![],
                vec![t("DESCRIPCIÓN"), t("Ene"), t("Feb"), t("Mar"), t("Acumulado")],
                vec![t("A emp. Distribuidoras"), n(1000.0), n(1100.0), Cell::Empty, n(2100.0)],
                vec![t("A clientes Libres"), n(500.0), n(600.0), Cell::Empty, n(1100.0)],
                vec![t("COES"), n(200.0), n(250.0), Cell::Empty, n(450.0)],
                vec![t("Consumo propio de centrales"), n(50.0), n(55.0), Cell::Empty, n(105.0)],
                vec![t("Pérdidas Sistemas Transmisión"), n(20.0), n(25.0), Cell::Empty, n(45.0)],
            ],
        );
        let result = energy_facts(&sheet, 2025);

        assert_eq!(result.observed_months, vec![Month::Ene, Month::Feb]);
        assert_eq!(result.facts.len(), 10);
        assert_eq!(find(&result, CategoryCode::ServiciosAux, Month::Feb), Some(55.0));
        assert_eq!(find(&result, CategoryCode::Perdidas, Month::Ene), Some(20.0));
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].kind, WarningKind::MonthsWithoutData);
        assert!(result.warnings[0].message.contains("Mar"));
    }

    #[test]
    fn test_purchase_section_does_not_override_sales() {
        let sheet = Sheet::new(
            "2019",
            vec![
                vec![t("BALANCE DE ENERGÍA EN MWh - AÑO 2019")],
                vec![],
                vec![t("DESCRIPCIÓN"), t("Enero"), t("Febrero"), t("Marzo")],
                vec![t("Venta de energía"), n(90.0), n(92.0), n(95.0)],
                vec![t("A emp. Distribuidoras"), n(10.0), n(11.0), n(12.0)],
                vec![t("A clientes Libres"), n(20.0), n(21.0), n(22.0)],
                vec![t("COES"), n(50.0), n(60.0), n(70.0)],
                vec![t("Compra de energía"), Cell::Empty, Cell::Empty, Cell::Empty],
                vec![t("COES"), n(0.0), n(0.0), n(0.0)],
                vec![t("Consumo propio de centrales"), n(5.0), n(6.0), n(7.0)],
                vec![t("Pérdidas Sistemas Transmisión"), n(1.0), n(2.0), n(3.0)],
            ],
        );
        let result = energy_facts(&sheet, 2019);

        assert_eq!(find(&result, CategoryCode::CoesSpot, Month::Feb), Some(60.0));
        assert_eq!(find(&result, CategoryCode::Regulados, Month::Ene), Some(10.0));
        assert_eq!(find(&result, CategoryCode::Perdidas, Month::Mar), Some(3.0));
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_unmapped_and_duplicate_rows() {
        let sheet = Sheet::new(
            "2023",
            vec![
                vec![t("BALANCE DE ENERGÍA EN MWh - AÑO 2023")],
                vec![t("DESCRIPCIÓN"), t("Ene"), t("Feb"), t("Mar")],
                vec![t("Generación propia"), n(1.0), n(1.0), n(1.0)],
                vec![t("Servicios auxiliares"), n(5.0), n(6.0), n(7.0)],
                vec![t("Consumo propio de centrales"), n(8.0), n(9.0), n(10.0)],
            ],
        );
        let result = energy_facts(&sheet, 2023);

        let unmapped: Vec<_> = result
            .warnings
            .iter()
            .filter(|w| w.kind == WarningKind::UnmappedLabel)
            .collect();
        assert_eq!(unmapped.len(), 1);
        assert!(unmapped[0].message.contains("Generación propia"));
        assert!(unmapped[0].message.contains("GENERACION PROPIA"));

        let duplicates: Vec<_> = result
            .warnings
            .iter()
            .filter(|w| w.kind == WarningKind::DuplicateCell)
            .collect();
        assert_eq!(duplicates.len(), 1);
        // Last write wins
        assert_eq!(find(&result, CategoryCode::ServiciosAux, Month::Ene), Some(8.0));
        assert_eq!(result.facts.len(), 3);
    }

    #[test]
    fn test_fact_shape() {
        let sheet = Sheet::new(
            "2022-R2",
            vec![
                vec![t("BALANCE DE ENERGÍA EN MWh - AÑO 2022")],
                vec![t("DESCRIPCIÓN"), t("Ene"), t("Feb"), t("Mar")],
                vec![t("A clientes Libres"), n(400.5), Cell::Empty, Cell::Empty],
            ],
        );
        let result = energy_facts(&sheet, 2022);
        let fact = &result.facts[0];
        assert_eq!(fact.date, NaiveDate::from_ymd_opt(2022, 1, 1).unwrap());
        assert_eq!(fact.unit, "MWh");
        assert_eq!(fact.value, 400.5);
        assert_eq!(fact.provenance.cell, "B3");
        assert_eq!(fact.provenance.sheet_name, "2022-R2");
        assert_eq!(fact.provenance.label, "A clientes Libres");
    }

    #[test]
    fn test_sales_table() {
        let sheet = Sheet::new(
            "2024",
            vec![
                vec![t("BALANCE DE ENERGÍA EN MWh - AÑO 2024")],
                vec![t("DESCRIPCIÓN"), t("Ene"), t("Feb")],
                vec![t("COES"), n(1.0), n(2.0)],
                vec![],
                vec![t("VENTAS (MILLONES DE SOLES)")],
                vec![t("DESCRIPCIÓN"), t("Ene"), t("Feb")],
                vec![t("Regulados"), n(10.0), n(11.0)],
                vec![t("Libres"), n(20.0), n(21.0)],
                vec![t("COES"), n(3.0), n(4.0)],
                vec![t("Otros"), n(0.5), n(0.7)],
            ],
        );
        let settings = LocatorSettings::default();
        let locator = TableLocator::new(&settings);
        let energy = locator.locate_energy(&sheet, 2024).unwrap();
        let layout = locator.locate_sales(&sheet, &energy).unwrap();
        let context = ctx(2024);
        let mapper = LabelMapper::default();
        let result = FactBuilder::new(&context, &mapper).build_sales(&sheet, &layout);

        assert_eq!(result.facts.len(), 8);
        assert!(result.warnings.is_empty());
        let otros: Vec<f64> = result
            .facts
            .iter()
            .filter(|f| f.metric == SalesCode::Otros)
            .map(|f| f.value)
            .collect();
        assert_eq!(otros, vec![0.5, 0.7]);
        assert!(result.facts.iter().all(|f| f.unit == "S/"));
    }
}
