//! Derived totals and the published overview snapshot
//!
//! Two headline figures are derived per month and must never be swapped:
//! official sales (REGULADOS + LIBRES) and the stacked-market total
//! (official sales + COES_SPOT), which exists only so stacked charts add up.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::facts::{Fact, SalesCode, SalesFact};
use super::labels::CategoryCode;
use super::months::Month;
use super::warnings::IngestWarning;

/// REGULADOS + LIBRES, the "energy sold" KPI
pub fn official_sales(regulados: f64, libres: f64) -> f64 {
    regulados + libres
}

/// Official sales + COES_SPOT, for stacked visualizations only
pub fn stacked_market_total(regulados: f64, libres: f64, coes: f64) -> f64 {
    official_sales(regulados, libres) + coes
}

/// One month of the energy table (MWh)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyPoint {
    pub year: i32,
    pub month: Month,
    pub label: String,
    pub regulados_mwh: f64,
    pub libres_mwh: f64,
    pub coes_mwh: f64,
    pub perdidas_mwh: f64,
    pub servicios_aux_mwh: f64,
    /// Official sales
    pub venta_energia_mwh: f64,
    /// Stacked-market total
    pub total_mercados_mwh: f64,
    pub warnings: Vec<String>,
}

/// One month of the currency table (S/)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesPoint {
    pub year: i32,
    pub month: Month,
    pub label: String,
    pub regulados: f64,
    pub libres: f64,
    pub coes_spot: f64,
    pub otros: f64,
    /// Regulados + libres
    pub venta: f64,
    /// All four categories
    pub total: f64,
    pub warnings: Vec<String>,
}

/// Per-category sums over the months a year actually reports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyTotals {
    pub regulados_mwh: f64,
    pub libres_mwh: f64,
    pub coes_mwh: f64,
    pub perdidas_mwh: f64,
    pub servicios_aux_mwh: f64,
    pub venta_energia_mwh: f64,
    pub total_mercados_mwh: f64,
}

impl EnergyTotals {
    fn add(&mut self, point: &EnergyPoint) {
        self.regulados_mwh += point.regulados_mwh;
        self.libres_mwh += point.libres_mwh;
        self.coes_mwh += point.coes_mwh;
        self.perdidas_mwh += point.perdidas_mwh;
        self.servicios_aux_mwh += point.servicios_aux_mwh;
        self.venta_energia_mwh += point.venta_energia_mwh;
        self.total_mercados_mwh += point.total_mercados_mwh;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearSummary {
    pub year: i32,
    pub observed_months: Vec<Month>,
    pub last_month: Option<Month>,
    pub month_count: usize,
    pub totals: EnergyTotals,
    /// Findings scoped to the whole year (not to one month)
    pub warnings: Vec<String>,
}

/// The published, queryable result of one successful run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceOverview {
    pub dataset_id: String,
    pub source_id: String,
    pub run_id: Option<String>,
    pub published_at: DateTime<Utc>,
    pub energy: Vec<EnergyPoint>,
    pub sales: Vec<SalesPoint>,
    pub years: Vec<YearSummary>,
    pub warnings: Vec<IngestWarning>,
}

impl BalanceOverview {
    /// Years with at least one fact, ascending
    pub fn years(&self) -> Vec<i32> {
        let years: BTreeSet<i32> = self
            .energy
            .iter()
            .map(|p| p.year)
            .chain(self.sales.iter().map(|p| p.year))
            .collect();
        years.into_iter().collect()
    }

    pub fn energy(&self, year: Option<i32>) -> Vec<&EnergyPoint> {
        self.energy
            .iter()
            .filter(|p| year.is_none_or(|y| p.year == y))
            .collect()
    }

    pub fn sales(&self, year: Option<i32>) -> Vec<&SalesPoint> {
        self.sales
            .iter()
            .filter(|p| year.is_none_or(|y| p.year == y))
            .collect()
    }

    pub fn summary(&self, year: i32) -> Option<&YearSummary> {
        self.years.iter().find(|s| s.year == year)
    }
}

/// Everything the aggregator needs from one run
pub struct AggregateInput<'a> {
    pub dataset_id: &'a str,
    pub source_id: &'a str,
    pub run_id: Option<String>,
    pub published_at: DateTime<Utc>,
    pub energy: &'a [Fact<CategoryCode>],
    pub sales: &'a [SalesFact],
    pub warnings: &'a [IngestWarning],
}

fn month_warnings(warnings: &[IngestWarning], year: i32, month: Month) -> Vec<String> {
    warnings
        .iter()
        .filter(|w| w.year == Some(year) && w.month == Some(month))
        .map(|w| w.to_string())
        .collect()
}

/// Build the overview snapshot; only months with facts produce points
pub fn aggregate(input: AggregateInput<'_>) -> BalanceOverview {
    let mut energy_cells: BTreeMap<(i32, Month), BTreeMap<CategoryCode, f64>> = BTreeMap::new();
    for fact in input.energy {
        energy_cells
            .entry((fact.year(), fact.month()))
            .or_default()
            .insert(fact.metric, fact.value);
    }

    let energy: Vec<EnergyPoint> = energy_cells
        .into_iter()
        .map(|((year, month), values)| {
            let get = |c: CategoryCode| values.get(&c).copied().unwrap_or(0.0);
            let regulados = get(CategoryCode::Regulados);
            let libres = get(CategoryCode::Libres);
            let coes = get(CategoryCode::CoesSpot);
            EnergyPoint {
                year,
                month,
                label: month.label().to_string(),
                regulados_mwh: regulados,
                libres_mwh: libres,
                coes_mwh: coes,
                perdidas_mwh: get(CategoryCode::Perdidas),
                servicios_aux_mwh: get(CategoryCode::ServiciosAux),
                venta_energia_mwh: official_sales(regulados, libres),
                total_mercados_mwh: stacked_market_total(regulados, libres, coes),
                warnings: month_warnings(input.warnings, year, month),
            }
        })
        .collect();

    let mut sales_cells: BTreeMap<(i32, Month), BTreeMap<SalesCode, f64>> = BTreeMap::new();
    for fact in input.sales {
        sales_cells
            .entry((fact.year(), fact.month()))
            .or_default()
            .insert(fact.metric, fact.value);
    }

    let sales: Vec<SalesPoint> = sales_cells
        .into_iter()
        .map(|((year, month), values)| {
            let get = |c: SalesCode| values.get(&c).copied().unwrap_or(0.0);
            let regulados = get(SalesCode::Regulados);
            let libres = get(SalesCode::Libres);
            let coes_spot = get(SalesCode::CoesSpot);
            let otros = get(SalesCode::Otros);
            SalesPoint {
                year,
                month,
                label: month.label().to_string(),
                regulados,
                libres,
                coes_spot,
                otros,
                venta: official_sales(regulados, libres),
                total: stacked_market_total(regulados, libres, coes_spot) + otros,
                warnings: month_warnings(input.warnings, year, month),
            }
        })
        .collect();

    let mut summaries: BTreeMap<i32, YearSummary> = BTreeMap::new();
    for point in &energy {
        let summary = summaries.entry(point.year).or_insert_with(|| YearSummary {
            year: point.year,
            observed_months: Vec::new(),
            last_month: None,
            month_count: 0,
            totals: EnergyTotals::default(),
            warnings: input
                .warnings
                .iter()
                .filter(|w| w.year == Some(point.year) && w.month.is_none())
                .map(|w| w.to_string())
                .collect(),
        });
        // Points arrive in calendar order
        summary.observed_months.push(point.month);
        summary.last_month = Some(point.month);
        summary.month_count += 1;
        summary.totals.add(point);
    }

    BalanceOverview {
        dataset_id: input.dataset_id.to_string(),
        source_id: input.source_id.to_string(),
        run_id: input.run_id,
        published_at: input.published_at,
        energy,
        sales,
        years: summaries.into_values().collect(),
        warnings: input.warnings.to_vec(),
    }
}
