//! Source registry repository

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteExecutor, SqlitePool};

/// A workbook feed that ingests into a dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub source_id: String,
    pub dataset_id: String,
    pub file_name: Option<String>,
    pub enabled: bool,
    pub last_ingested: Option<DateTime<Utc>>,
}

impl Source {
    pub fn new(source_id: &str, dataset_id: &str) -> Self {
        Source {
            source_id: source_id.to_string(),
            dataset_id: dataset_id.to_string(),
            file_name: None,
            enabled: true,
            last_ingested: None,
        }
    }
}

fn source_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Source> {
    Ok(Source {
        source_id: row.try_get("source_id")?,
        dataset_id: row.try_get("dataset_id")?,
        file_name: row.try_get("file_name")?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        last_ingested: row.try_get("last_ingested")?,
    })
}

/// Register a source or update its dataset and file name
pub async fn upsert_source(pool: &SqlitePool, source: &Source) -> Result<()> {
    sqlx::query(
        "INSERT INTO sources (source_id, dataset_id, file_name, enabled, created_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(source_id) DO UPDATE SET
            dataset_id = excluded.dataset_id,
            file_name = COALESCE(excluded.file_name, sources.file_name)",
    )
    .bind(&source.source_id)
    .bind(&source.dataset_id)
    .bind(&source.file_name)
    .bind(source.enabled as i64)
    .bind(Utc::now())
    .execute(pool)
    .await
    .with_context(|| format!("Failed to save source '{}'", source.source_id))?;

    Ok(())
}

pub async fn get_source(pool: &SqlitePool, source_id: &str) -> Result<Option<Source>> {
    let row = sqlx::query(
        "SELECT source_id, dataset_id, file_name, enabled, last_ingested
         FROM sources WHERE source_id = ?",
    )
    .bind(source_id)
    .fetch_optional(pool)
    .await
    .context("Failed to get source")?;

    row.as_ref().map(source_from_row).transpose()
}

pub async fn list_sources(pool: &SqlitePool) -> Result<Vec<Source>> {
    let rows = sqlx::query(
        "SELECT source_id, dataset_id, file_name, enabled, last_ingested
         FROM sources ORDER BY source_id",
    )
    .fetch_all(pool)
    .await
    .context("Failed to list sources")?;

    rows.iter().map(source_from_row).collect()
}

/// Record the file and time of the latest published run
pub async fn mark_ingested<'e>(
    executor: impl SqliteExecutor<'e>,
    source_id: &str,
    file_name: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE sources SET file_name = ?, last_ingested = ? WHERE source_id = ?")
        .bind(file_name)
        .bind(at)
        .bind(source_id)
        .execute(executor)
        .await
        .context("Failed to mark source as ingested")?;

    Ok(())
}
