//! Persisted fact repository
//!
//! A source's facts are replaced wholesale inside the caller's transaction, so
//! a published run never coexists with leftovers of the run it superseded and
//! nothing is visible until the run itself is recorded.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::balance::facts::{Fact, Metric, Provenance, SalesFact};
use crate::balance::CategoryCode;

async fn insert_facts<M: Metric>(
    tx: &mut Transaction<'_, Sqlite>,
    facts: &[Fact<M>],
    run_id: &str,
) -> Result<()> {
    for fact in facts {
        sqlx::query(
            "INSERT OR REPLACE INTO balance_facts
                (source_id, dataset_id, table_kind, date, metric, value, unit,
                 sheet_name, cell, label, updated_at, run_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&fact.source_id)
        .bind(&fact.dataset_id)
        .bind(M::TABLE.as_str())
        .bind(fact.date)
        .bind(fact.metric.code())
        .bind(fact.value)
        .bind(&fact.unit)
        .bind(&fact.provenance.sheet_name)
        .bind(&fact.provenance.cell)
        .bind(&fact.provenance.label)
        .bind(fact.updated_at)
        .bind(run_id)
        .execute(&mut **tx)
        .await
        .context("Failed to insert fact")?;
    }
    Ok(())
}

/// Replace every fact of a source with the facts of a new run (uncommitted)
pub async fn replace_facts(
    tx: &mut Transaction<'_, Sqlite>,
    source_id: &str,
    run_id: &str,
    energy: &[Fact<CategoryCode>],
    sales: &[SalesFact],
) -> Result<()> {
    sqlx::query("DELETE FROM balance_facts WHERE source_id = ?")
        .bind(source_id)
        .execute(&mut **tx)
        .await
        .context("Failed to clear previous facts")?;

    insert_facts(tx, energy, run_id).await?;
    insert_facts(tx, sales, run_id).await?;

    log::debug!(
        "Stored {} energy and {} sales facts for source '{}'",
        energy.len(),
        sales.len(),
        source_id
    );
    Ok(())
}

/// Load one table's facts for a source, ordered by date and metric
pub async fn load_facts<M: Metric>(pool: &SqlitePool, source_id: &str) -> Result<Vec<Fact<M>>> {
    let rows = sqlx::query(
        "SELECT source_id, dataset_id, date, metric, value, unit, sheet_name, cell, label, updated_at
         FROM balance_facts
         WHERE source_id = ? AND table_kind = ?
         ORDER BY date, metric",
    )
    .bind(source_id)
    .bind(M::TABLE.as_str())
    .fetch_all(pool)
    .await
    .context("Failed to load facts")?;

    let mut facts = Vec::with_capacity(rows.len());
    for row in rows {
        let code: String = row.try_get("metric")?;
        let Some(metric) = M::from_code(&code) else {
            log::warn!("Ignoring stored fact with unknown metric '{}'", code);
            continue;
        };
        facts.push(Fact {
            dataset_id: row.try_get("dataset_id")?,
            source_id: row.try_get("source_id")?,
            date: row.try_get::<NaiveDate, _>("date")?,
            metric,
            value: row.try_get("value")?,
            unit: row.try_get("unit")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            provenance: Provenance {
                sheet_name: row.try_get("sheet_name")?,
                cell: row.try_get("cell")?,
                label: row.try_get("label")?,
            },
        });
    }
    facts.sort_by(|a, b| a.date.cmp(&b.date).then(a.metric.cmp(&b.metric)));

    Ok(facts)
}

/// Years with at least one energy fact for a source
pub async fn list_years(pool: &SqlitePool, source_id: &str) -> Result<Vec<i32>> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT DISTINCT CAST(substr(date, 1, 4) AS INTEGER) AS year
         FROM balance_facts
         WHERE source_id = ? AND table_kind = 'energy'
         ORDER BY year",
    )
    .bind(source_id)
    .fetch_all(pool)
    .await
    .context("Failed to list years")?;

    Ok(rows.into_iter().map(|(y,)| y as i32).collect())
}
