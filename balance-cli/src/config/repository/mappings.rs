//! Operator label mapping overrides repository
//!
//! Labels are stored normalized, so "A Clientes Libres:" and "A CLIENTES
//! LIBRES" address the same override.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::balance::CategoryCode;
use crate::balance::labels::normalize_label;

/// All overrides as normalized label -> category, ordered by label
pub async fn list_label_mappings(pool: &SqlitePool) -> Result<Vec<(String, CategoryCode)>> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT label, category FROM label_mappings ORDER BY label")
            .fetch_all(pool)
            .await
            .context("Failed to get label mappings")?;

    let mut mappings = Vec::with_capacity(rows.len());
    for (label, code) in rows {
        match CategoryCode::from_code(&code) {
            Some(category) => mappings.push((label, category)),
            None => log::warn!("Ignoring label mapping '{}' with unknown category '{}'", label, code),
        }
    }

    Ok(mappings)
}

/// Overrides keyed for [`crate::balance::LabelMapper::with_overrides`]
pub async fn get_label_mappings(pool: &SqlitePool) -> Result<HashMap<String, CategoryCode>> {
    Ok(list_label_mappings(pool).await?.into_iter().collect())
}

/// Insert or replace the override for a label; returns the stored (normalized) label
pub async fn set_label_mapping(pool: &SqlitePool, label: &str, category: CategoryCode) -> Result<String> {
    let normalized = normalize_label(label);
    if normalized.is_empty() {
        anyhow::bail!("Label must not be empty");
    }

    sqlx::query(
        "INSERT INTO label_mappings (label, category, created_at)
         VALUES (?, ?, ?)
         ON CONFLICT(label) DO UPDATE SET category = excluded.category",
    )
    .bind(&normalized)
    .bind(category.code())
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("Failed to set label mapping")?;

    Ok(normalized)
}

/// Delete the override for a label; false when none existed
pub async fn delete_label_mapping(pool: &SqlitePool, label: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM label_mappings WHERE label = ?")
        .bind(normalize_label(label))
        .execute(pool)
        .await
        .context("Failed to delete label mapping")?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::repository::connect_in_memory;

    #[tokio::test]
    async fn test_label_mapping_crud() {
        let pool = connect_in_memory().await.unwrap();
        assert!(get_label_mappings(&pool).await.unwrap().is_empty());

        let stored = set_label_mapping(&pool, "  Ventas a usuarios finales:", CategoryCode::Libres)
            .await
            .unwrap();
        assert_eq!(stored, "VENTAS A USUARIOS FINALES");

        // Same label after normalization replaces the category
        set_label_mapping(&pool, "ventas a usuarios finales", CategoryCode::Regulados)
            .await
            .unwrap();
        set_label_mapping(&pool, "Generación propia", CategoryCode::ServiciosAux)
            .await
            .unwrap();

        let mappings = list_label_mappings(&pool).await.unwrap();
        assert_eq!(
            mappings,
            vec![
                ("GENERACION PROPIA".to_string(), CategoryCode::ServiciosAux),
                ("VENTAS A USUARIOS FINALES".to_string(), CategoryCode::Regulados),
            ]
        );

        assert!(delete_label_mapping(&pool, "Generacion Propia").await.unwrap());
        assert!(!delete_label_mapping(&pool, "Generacion Propia").await.unwrap());
        assert_eq!(get_label_mappings(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_label_is_rejected() {
        let pool = connect_in_memory().await.unwrap();
        assert!(set_label_mapping(&pool, "  ", CategoryCode::Libres).await.is_err());
    }
}
