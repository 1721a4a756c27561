//! Ingestion run history (append-only)

use anyhow::{Context, Result};
use sqlx::{Row, SqliteExecutor, SqlitePool};

use crate::balance::IngestWarning;
use crate::ingest::run::{IngestionRun, RunStatus};

fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<IngestionRun> {
    let status: String = row.try_get("status")?;
    let warnings: String = row.try_get("warnings")?;
    Ok(IngestionRun {
        id: row.try_get("id")?,
        dataset_id: row.try_get("dataset_id")?,
        source_id: row.try_get("source_id")?,
        ran_at: row.try_get("ran_at")?,
        status: RunStatus::parse(&status)
            .with_context(|| format!("Unknown run status '{}'", status))?,
        parser_name: row.try_get("parser_name")?,
        message: row.try_get("message")?,
        warnings: serde_json::from_str::<Vec<IngestWarning>>(&warnings)
            .context("Failed to decode run warnings")?,
    })
}

pub async fn insert_run<'e>(executor: impl SqliteExecutor<'e>, run: &IngestionRun) -> Result<()> {
    let warnings = serde_json::to_string(&run.warnings).context("Failed to encode run warnings")?;
    sqlx::query(
        "INSERT INTO ingestion_runs (id, dataset_id, source_id, ran_at, status, parser_name, message, warnings)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&run.id)
    .bind(&run.dataset_id)
    .bind(&run.source_id)
    .bind(run.ran_at)
    .bind(run.status.as_str())
    .bind(&run.parser_name)
    .bind(&run.message)
    .bind(warnings)
    .execute(executor)
    .await
    .context("Failed to record ingestion run")?;

    Ok(())
}

/// Most recent runs first, optionally for one source
pub async fn list_runs(pool: &SqlitePool, source_id: Option<&str>, limit: u32) -> Result<Vec<IngestionRun>> {
    let rows = match source_id {
        Some(source_id) => {
            sqlx::query(
                "SELECT * FROM ingestion_runs WHERE source_id = ?
                 ORDER BY ran_at DESC, rowid DESC LIMIT ?",
            )
            .bind(source_id)
            .bind(limit as i64)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query("SELECT * FROM ingestion_runs ORDER BY ran_at DESC, rowid DESC LIMIT ?")
                .bind(limit as i64)
                .fetch_all(pool)
                .await
        }
    }
    .context("Failed to list ingestion runs")?;

    rows.iter().map(run_from_row).collect()
}

/// Latest run that published a snapshot
pub async fn latest_published_run(pool: &SqlitePool, source_id: &str) -> Result<Option<IngestionRun>> {
    let row = sqlx::query(
        "SELECT * FROM ingestion_runs
         WHERE source_id = ? AND status != 'ERROR'
         ORDER BY ran_at DESC, rowid DESC LIMIT 1",
    )
    .bind(source_id)
    .fetch_optional(pool)
    .await
    .context("Failed to get latest run")?;

    row.as_ref().map(run_from_row).transpose()
}
