//! Repository layer for database operations

pub mod facts;
pub mod mappings;
pub mod runs;
pub mod sources;

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sources (
        source_id TEXT PRIMARY KEY,
        dataset_id TEXT NOT NULL,
        file_name TEXT,
        enabled INTEGER NOT NULL DEFAULT 1,
        last_ingested TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS balance_facts (
        source_id TEXT NOT NULL,
        dataset_id TEXT NOT NULL,
        table_kind TEXT NOT NULL,
        date TEXT NOT NULL,
        metric TEXT NOT NULL,
        value REAL NOT NULL,
        unit TEXT NOT NULL,
        sheet_name TEXT NOT NULL,
        cell TEXT NOT NULL,
        label TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        run_id TEXT NOT NULL,
        PRIMARY KEY (source_id, table_kind, date, metric)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ingestion_runs (
        id TEXT PRIMARY KEY,
        dataset_id TEXT NOT NULL,
        source_id TEXT NOT NULL,
        ran_at TEXT NOT NULL,
        status TEXT NOT NULL,
        parser_name TEXT NOT NULL,
        message TEXT NOT NULL,
        warnings TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_ingestion_runs_source ON ingestion_runs (source_id, ran_at)",
    r#"
    CREATE TABLE IF NOT EXISTS label_mappings (
        label TEXT PRIMARY KEY,
        category TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
];

/// Open (creating if needed) the database file and ensure the schema exists
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    init_schema(&pool).await?;
    log::debug!("Database ready at {}", db_path.display());
    Ok(pool)
}

/// Single-connection in-memory database (every connection would get its own)
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .context("Failed to open in-memory database")?;
    init_schema(&pool).await?;
    Ok(pool)
}

pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to initialize database schema")?;
    }
    Ok(())
}
