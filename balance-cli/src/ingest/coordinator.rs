//! Ingestion run coordinator
//!
//! Owns the run lifecycle: claims the source, runs the engine off the async
//! runtime, persists facts, finalizes exactly one run record and, only when the
//! run produced usable years, swaps in the new snapshot and notifies
//! subscribers. An ERROR run leaves the previous snapshot untouched.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::events::{ChangeEvent, EventBus};
use super::guard::{GuardStats, SourceGuard};
use super::run::{IngestError, IngestionRun, RunStatus};
use super::snapshot::SnapshotStore;
use crate::balance::aggregate::{AggregateInput, aggregate};
use crate::balance::workbook::{self, RetryPolicy};
use crate::balance::{
    BalanceOverview, CategoryCode, IngestWarning, LabelMapper, LocatorSettings, PARSER_NAME,
    ParsedWorkbook, SalesCode, SourceIdentity, Workbook, WorkbookError, process_workbook,
};
use crate::config::Config;
use crate::config::repository::sources::Source;
use crate::config::repository::{facts, mappings, runs, sources};

/// Engine settings the coordinator hands to every run
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub locator: LocatorSettings,
    /// Configured rule table; stored overrides are layered on per run
    pub mapper: LabelMapper,
    pub retry: RetryPolicy,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        CoordinatorSettings {
            locator: LocatorSettings::default(),
            mapper: LabelMapper::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&Config> for CoordinatorSettings {
    fn from(config: &Config) -> Self {
        CoordinatorSettings {
            locator: config.locator_settings(),
            mapper: config.label_mapper(),
            retry: config.retry_policy(),
        }
    }
}

/// What a finalized run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: IngestionRun,
    /// Years with facts, ascending
    pub years: Vec<i32>,
    /// The snapshot published by this run (never set on ERROR)
    pub overview: Option<Arc<BalanceOverview>>,
}

/// Intermediate result of the engine stage
enum Stage {
    Parsed(ParsedWorkbook),
    Failed {
        message: String,
        warnings: Vec<IngestWarning>,
    },
}

pub struct Coordinator {
    pool: SqlitePool,
    settings: CoordinatorSettings,
    guard: SourceGuard,
    snapshots: Arc<SnapshotStore>,
    events: EventBus,
}

impl Coordinator {
    pub fn new(pool: SqlitePool, settings: CoordinatorSettings) -> Self {
        Coordinator {
            pool,
            settings,
            guard: SourceGuard::new(),
            snapshots: Arc::new(SnapshotStore::new()),
            events: EventBus::default(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn snapshots(&self) -> Arc<SnapshotStore> {
        self.snapshots.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Counters of started and refused runs since start-up
    pub fn run_stats(&self) -> GuardStats {
        self.guard.stats()
    }

    /// Ingest a workbook file, retrying the open per the configured policy
    pub async fn ingest_file(&self, source: &Source, path: &Path) -> Result<RunOutcome> {
        let path = path.to_path_buf();
        let retry = self.settings.retry;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        self.ingest_with(source, &file_name, move || workbook::load(&path, retry))
            .await
    }

    /// Run one ingestion with a caller-supplied workbook loader
    ///
    /// The loader and the engine run on the blocking pool. Refusals
    /// ([`IngestError`]) are returned before any run record exists.
    pub async fn ingest_with<L>(&self, source: &Source, file_name: &str, load: L) -> Result<RunOutcome>
    where
        L: FnOnce() -> Result<Workbook, WorkbookError> + Send + 'static,
    {
        if !source.enabled {
            return Err(IngestError::SourceDisabled {
                source_id: source.source_id.clone(),
            }
            .into());
        }
        let permit = self
            .guard
            .try_acquire(&source.source_id)
            .ok_or_else(|| IngestError::AlreadyRunning {
                source_id: source.source_id.clone(),
            })?;

        let run_id = Uuid::new_v4().to_string();
        let ran_at = Utc::now();
        log::info!(
            "Run {} started for source '{}' ({})",
            run_id,
            permit.source_id(),
            file_name
        );

        let stage = self.parse(source, ran_at, load).await;
        let mut run = IngestionRun {
            id: run_id,
            dataset_id: source.dataset_id.clone(),
            source_id: source.source_id.clone(),
            ran_at,
            status: RunStatus::Error,
            parser_name: PARSER_NAME.to_string(),
            message: String::new(),
            warnings: Vec::new(),
        };

        let parsed = match stage {
            Stage::Parsed(parsed) => parsed,
            Stage::Failed { message, warnings } => {
                run.message = message;
                run.warnings = warnings;
                return self.finish_error(run).await;
            }
        };

        let years = parsed.years();
        run.warnings = parsed.warnings.clone();
        for warning in &run.warnings {
            log::warn!("{}", warning);
        }

        run.status = if parsed.is_degraded() {
            RunStatus::Warning
        } else {
            RunStatus::Success
        };
        run.message = format!(
            "{} year(s) {}, {} energy and {} sales facts, {} warning(s)",
            years.len(),
            year_span(&years),
            parsed.energy.len(),
            parsed.sales.len(),
            run.warnings.len()
        );

        if let Err(e) = self.commit_run(source, &run, &parsed, file_name, ran_at).await {
            run.status = RunStatus::Error;
            run.message = format!("{:#}", e);
            return self.finish_error(run).await;
        }

        let overview = aggregate(AggregateInput {
            dataset_id: &source.dataset_id,
            source_id: &source.source_id,
            run_id: Some(run.id.clone()),
            published_at: Utc::now(),
            energy: &parsed.energy,
            sales: &parsed.sales,
            warnings: &run.warnings,
        });
        self.snapshots.publish(overview);
        let overview = self.snapshots.get(&source.dataset_id);

        self.events.publish(ChangeEvent::dataset_updated(
            &source.dataset_id,
            &source.source_id,
            years.last().copied(),
            run.warning_lines(),
        ));
        log::info!("Run {} finished: {} ({})", run.id, run.status, run.message);

        Ok(RunOutcome { run, years, overview })
    }

    async fn parse<L>(&self, source: &Source, ran_at: DateTime<Utc>, load: L) -> Stage
    where
        L: FnOnce() -> Result<Workbook, WorkbookError> + Send + 'static,
    {
        let overrides = match mappings::get_label_mappings(&self.pool).await {
            Ok(overrides) => overrides,
            Err(e) => {
                return Stage::Failed {
                    message: format!("{:#}", e),
                    warnings: Vec::new(),
                };
            }
        };

        let identity = SourceIdentity {
            dataset_id: source.dataset_id.clone(),
            source_id: source.source_id.clone(),
        };
        let locator = self.settings.locator.clone();
        let mapper = self.settings.mapper.clone().with_overrides(overrides);

        let joined = tokio::task::spawn_blocking(move || {
            let workbook = load()?;
            Ok::<_, WorkbookError>(process_workbook(&workbook, &identity, &locator, &mapper, ran_at))
        })
        .await;

        match joined {
            Ok(Ok(parsed)) if parsed.years().is_empty() => Stage::Failed {
                message: "no years resolved from workbook".to_string(),
                warnings: parsed.warnings,
            },
            Ok(Ok(parsed)) => Stage::Parsed(parsed),
            Ok(Err(e)) => Stage::Failed {
                message: e.to_string(),
                warnings: Vec::new(),
            },
            Err(e) => Stage::Failed {
                message: format!("ingestion task failed: {}", e),
                warnings: Vec::new(),
            },
        }
    }

    /// Store facts, the run record and the source's last ingestion as one unit
    async fn commit_run(
        &self,
        source: &Source,
        run: &IngestionRun,
        parsed: &ParsedWorkbook,
        file_name: &str,
        ran_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin ingestion transaction")?;
        facts::replace_facts(&mut tx, &source.source_id, &run.id, &parsed.energy, &parsed.sales).await?;
        runs::insert_run(&mut *tx, run).await?;
        sources::mark_ingested(&mut *tx, &source.source_id, file_name, ran_at).await?;
        tx.commit().await.context("Failed to commit ingestion run")?;
        Ok(())
    }

    async fn finish_error(&self, run: IngestionRun) -> Result<RunOutcome> {
        log::error!("Run {} failed for source '{}': {}", run.id, run.source_id, run.message);
        if let Err(e) = runs::insert_run(&self.pool, &run).await {
            log::error!("Failed to record run {}: {:#}", run.id, e);
        }
        self.events.publish(ChangeEvent::etl_error(
            &run.dataset_id,
            &run.source_id,
            run.message.clone(),
        ));
        Ok(RunOutcome {
            run,
            years: Vec::new(),
            overview: None,
        })
    }

    /// Rebuild a source's snapshot from persisted facts and its latest published run
    pub async fn restore(&self, source: &Source) -> Result<Option<Arc<BalanceOverview>>> {
        let energy = facts::load_facts::<CategoryCode>(&self.pool, &source.source_id)
            .await
            .context("Failed to restore energy facts")?;
        let sales = facts::load_facts::<SalesCode>(&self.pool, &source.source_id)
            .await
            .context("Failed to restore sales facts")?;
        if energy.is_empty() && sales.is_empty() {
            log::debug!("Nothing to restore for source '{}'", source.source_id);
            return Ok(None);
        }

        let latest = runs::latest_published_run(&self.pool, &source.source_id).await?;
        let (run_id, published_at, warnings) = match latest {
            Some(run) => (Some(run.id), run.ran_at, run.warnings),
            None => (None, Utc::now(), Vec::new()),
        };

        let overview = aggregate(AggregateInput {
            dataset_id: &source.dataset_id,
            source_id: &source.source_id,
            run_id,
            published_at,
            energy: &energy,
            sales: &sales,
            warnings: &warnings,
        });
        self.snapshots.publish(overview);
        Ok(self.snapshots.get(&source.dataset_id))
    }
}

fn year_span(years: &[i32]) -> String {
    match (years.first(), years.last()) {
        (Some(first), Some(last)) if first != last => format!("{}-{}", first, last),
        (Some(first), _) => first.to_string(),
        _ => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::workbook::{Cell, Sheet};
    use crate::balance::{Month, WarningKind};
    use crate::config::repository::connect_in_memory;
    use crate::ingest::events::EventType;

    fn t(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn n(v: f64) -> Cell {
        Cell::Number(v)
    }

    fn year_sheet(name: &str, year: i32, label: &str, march: Cell) -> Sheet {
        Sheet::new(
            name,
            vec![
                vec![t(&format!("BALANCE DE ENERGÍA EN MWh - AÑO {}", year))],
                vec![t("DESCRIPCIÓN"), t("Ene"), t("Feb"), t("Mar")],
                vec![t("A emp. Distribuidoras"), n(100.0), n(110.0), march],
                vec![t("A clientes Libres"), n(50.0), n(55.0), n(60.0)],
                vec![t("COES"), n(10.0), n(11.0), n(12.0)],
                vec![t(label), n(1.0), n(1.0), n(1.0)],
            ],
        )
    }

    fn good_workbook() -> Workbook {
        Workbook::new(vec![
            year_sheet("2023", 2023, "Pérdidas Sistemas Transmisión", n(120.0)),
            year_sheet("2024", 2024, "Servicios auxiliares", n(130.0)),
            year_sheet("2024 R1", 2024, "Servicios auxiliares", n(140.0)),
        ])
    }

    async fn coordinator() -> (Coordinator, Source) {
        let pool = connect_in_memory().await.unwrap();
        let source = Source::new("balance-xlsx", "balance");
        sources::upsert_source(&pool, &source).await.unwrap();
        (Coordinator::new(pool, CoordinatorSettings::default()), source)
    }

    #[tokio::test]
    async fn test_successful_run_publishes_and_notifies() {
        let (coordinator, source) = coordinator().await;
        let mut rx = coordinator.events().subscribe();

        let outcome = coordinator
            .ingest_with(&source, "balance.xlsx", || Ok(good_workbook()))
            .await
            .unwrap();

        assert_eq!(outcome.run.status, RunStatus::Success);
        assert_eq!(outcome.years, vec![2023, 2024]);
        let overview = outcome.overview.unwrap();
        let march_2024 = overview
            .energy(Some(2024))
            .into_iter()
            .find(|p| p.month == Month::Mar)
            .unwrap();
        assert_eq!(march_2024.regulados_mwh, 140.0);
        assert_eq!(march_2024.venta_energia_mwh, 200.0);
        assert_eq!(march_2024.total_mercados_mwh, 212.0);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventType::DatasetUpdated);
        assert_eq!(event.year, Some(2024));

        let history = runs::list_runs(coordinator.pool(), Some("balance-xlsx"), 10).await.unwrap();
        assert_eq!(history.len(), 1);
        let stored = sources::get_source(coordinator.pool(), "balance-xlsx").await.unwrap().unwrap();
        assert_eq!(stored.file_name.as_deref(), Some("balance.xlsx"));
    }

    #[tokio::test]
    async fn test_skipped_cells_make_a_warning_run() {
        let (coordinator, source) = coordinator().await;
        let workbook = Workbook::new(vec![year_sheet("2024", 2024, "COES", t("n/d"))]);

        let outcome = coordinator
            .ingest_with(&source, "balance.xlsx", move || Ok(workbook))
            .await
            .unwrap();

        assert_eq!(outcome.run.status, RunStatus::Warning);
        assert!(outcome.run.warnings.iter().any(|w| w.kind == WarningKind::CellParse));
        // Two COES rows collide
        assert!(outcome.run.warnings.iter().any(|w| w.kind == WarningKind::DuplicateCell));
        assert!(coordinator.snapshots().get("balance").is_some());
    }

    #[tokio::test]
    async fn test_notes_sheet_makes_a_warning_run() {
        let (coordinator, source) = coordinator().await;
        let workbook = Workbook::new(vec![
            Sheet::new("Notas", vec![vec![t("Fuente: COES")]]),
            year_sheet("2023", 2023, "Pérdidas Sistemas Transmisión", n(120.0)),
        ]);

        let outcome = coordinator
            .ingest_with(&source, "balance.xlsx", move || Ok(workbook))
            .await
            .unwrap();

        assert_eq!(outcome.run.status, RunStatus::Warning);
        assert_eq!(outcome.run.warnings.len(), 1);
        assert_eq!(outcome.run.warnings[0].kind, WarningKind::SheetSkipped);
    }

    #[tokio::test]
    async fn test_no_years_is_an_error_and_keeps_previous_snapshot() {
        let (coordinator, source) = coordinator().await;
        coordinator
            .ingest_with(&source, "balance.xlsx", || Ok(good_workbook()))
            .await
            .unwrap();
        let before = coordinator.snapshots().get("balance").unwrap();

        let mut rx = coordinator.events().subscribe();
        let outcome = coordinator
            .ingest_with(&source, "otro.xlsx", || {
                Ok(Workbook::new(vec![Sheet::new("Resumen", vec![]), Sheet::new("R", vec![])]))
            })
            .await
            .unwrap();

        assert_eq!(outcome.run.status, RunStatus::Error);
        assert!(outcome.years.is_empty());
        assert!(outcome.overview.is_none());
        let after = coordinator.snapshots().get("balance").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(rx.recv().await.unwrap().kind, EventType::EtlError);

        // Facts from the published run are still stored
        let years = facts::list_years(coordinator.pool(), "balance-xlsx").await.unwrap();
        assert_eq!(years, vec![2023, 2024]);
    }

    #[tokio::test]
    async fn test_failed_run_record_rolls_back_facts() {
        let (coordinator, source) = coordinator().await;
        coordinator
            .ingest_with(&source, "balance.xlsx", || Ok(good_workbook()))
            .await
            .unwrap();
        let before = coordinator.snapshots().get("balance").unwrap();

        sqlx::query(
            "CREATE TRIGGER reject_published_runs BEFORE INSERT ON ingestion_runs
             WHEN NEW.status != 'ERROR'
             BEGIN SELECT RAISE(ABORT, 'run history unavailable'); END",
        )
        .execute(coordinator.pool())
        .await
        .unwrap();

        let mut rx = coordinator.events().subscribe();
        let outcome = coordinator
            .ingest_with(&source, "nuevo.xlsx", || {
                Ok(Workbook::new(vec![year_sheet("2025", 2025, "COES", n(13.0))]))
            })
            .await
            .unwrap();

        assert_eq!(outcome.run.status, RunStatus::Error);
        assert!(outcome.run.message.contains("run history unavailable"));
        assert!(outcome.overview.is_none());
        assert_eq!(rx.recv().await.unwrap().kind, EventType::EtlError);

        let after = coordinator.snapshots().get("balance").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        let years = facts::list_years(coordinator.pool(), "balance-xlsx").await.unwrap();
        assert_eq!(years, vec![2023, 2024]);
        let stored = sources::get_source(coordinator.pool(), "balance-xlsx").await.unwrap().unwrap();
        assert_eq!(stored.file_name.as_deref(), Some("balance.xlsx"));

        let history = runs::list_runs(coordinator.pool(), Some("balance-xlsx"), 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, RunStatus::Error);
    }

    #[tokio::test]
    async fn test_workbook_error_is_recorded() {
        let (coordinator, source) = coordinator().await;
        let outcome = coordinator
            .ingest_file(&source, Path::new("/nonexistent/balance.xlsx"))
            .await
            .unwrap();
        assert_eq!(outcome.run.status, RunStatus::Error);
        assert!(outcome.run.message.contains("not found"));
        assert!(coordinator.snapshots().get("balance").is_none());

        let latest = runs::latest_published_run(coordinator.pool(), "balance-xlsx").await.unwrap();
        assert!(latest.is_none());
    }

    #[tokio::test]
    async fn test_refusals() {
        let (coordinator, source) = coordinator().await;

        let permit = coordinator.guard.try_acquire("balance-xlsx").unwrap();
        let err = coordinator
            .ingest_with(&source, "balance.xlsx", || Ok(good_workbook()))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::AlreadyRunning { .. })
        ));
        drop(permit);

        let mut disabled = source.clone();
        disabled.enabled = false;
        let err = coordinator
            .ingest_with(&disabled, "balance.xlsx", || Ok(good_workbook()))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::SourceDisabled { .. })
        ));

        // Refused runs leave no history
        let history = runs::list_runs(coordinator.pool(), None, 10).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_stored_label_override_applies() {
        let (coordinator, source) = coordinator().await;
        mappings::set_label_mapping(coordinator.pool(), "Generación propia", CategoryCode::Perdidas)
            .await
            .unwrap();
        let workbook = Workbook::new(vec![year_sheet("2022", 2022, "Generación propia", n(1.0))]);

        let outcome = coordinator
            .ingest_with(&source, "balance.xlsx", move || Ok(workbook))
            .await
            .unwrap();
        assert_eq!(outcome.run.status, RunStatus::Success);
        let overview = outcome.overview.unwrap();
        assert_eq!(overview.summary(2022).unwrap().totals.perdidas_mwh, 3.0);
    }

    #[tokio::test]
    async fn test_restore_rebuilds_snapshot() {
        let pool = connect_in_memory().await.unwrap();
        let source = Source::new("balance-xlsx", "balance");
        sources::upsert_source(&pool, &source).await.unwrap();

        let first = Coordinator::new(pool.clone(), CoordinatorSettings::default());
        let published = first
            .ingest_with(&source, "balance.xlsx", || Ok(good_workbook()))
            .await
            .unwrap()
            .overview
            .unwrap();

        let second = Coordinator::new(pool, CoordinatorSettings::default());
        assert!(second.snapshots().get("balance").is_none());
        let restored = second.restore(&source).await.unwrap().unwrap();
        assert_eq!(restored.energy, published.energy);
        assert_eq!(restored.run_id, published.run_id);
        assert_eq!(restored.years(), vec![2023, 2024]);
    }

    #[tokio::test]
    async fn test_end_to_end_xlsx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("balance.xlsx");

        let mut workbook = rust_xlsxwriter::Workbook::new();
        for (name, year, regulados) in [("2025", 2025, 900.0), ("2025V1", 2025, 1000.0)] {
            let sheet = workbook.add_worksheet();
            sheet.set_name(name).unwrap();
            sheet
                .write_string(1, 1, format!("BALANCE DE ENERGÍA EN MWh - AÑO {}", year))
                .unwrap();
            for (col, header) in ["DESCRIPCIÓN", "Ene", "Feb", "Mar"].iter().enumerate() {
                sheet.write_string(3, 1 + col as u16, *header).unwrap();
            }
            sheet.write_string(4, 1, "A emp. Distribuidoras").unwrap();
            sheet.write_number(4, 2, regulados).unwrap();
            sheet.write_number(4, 3, regulados + 100.0).unwrap();
            sheet.write_string(5, 1, "A clientes Libres").unwrap();
            sheet.write_number(5, 2, 500.0).unwrap();
            sheet.write_number(5, 3, 600.0).unwrap();
            sheet.write_string(6, 1, "COES").unwrap();
            sheet.write_number(6, 2, 200.0).unwrap();
            sheet.write_number(6, 3, 250.0).unwrap();
        }
        workbook.save(&path).unwrap();

        let (coordinator, source) = coordinator().await;
        let outcome = coordinator.ingest_file(&source, &path).await.unwrap();

        assert_eq!(outcome.run.status, RunStatus::Warning);
        assert_eq!(outcome.years, vec![2025]);
        let overview = outcome.overview.unwrap();
        let summary = overview.summary(2025).unwrap();
        assert_eq!(summary.observed_months, vec![Month::Ene, Month::Feb]);
        assert_eq!(summary.totals.regulados_mwh, 2100.0);
        assert!(
            overview
                .warnings
                .iter()
                .any(|w| w.kind == WarningKind::MonthsWithoutData)
        );

        let stored: Vec<crate::balance::Fact> =
            facts::load_facts(coordinator.pool(), "balance-xlsx").await.unwrap();
        let first = &stored[0];
        assert_eq!(first.provenance.sheet_name, "2025V1");
        // The grid starts at B2, so the first January value lives in C5
        assert_eq!(first.provenance.cell, "C5");
    }
}
