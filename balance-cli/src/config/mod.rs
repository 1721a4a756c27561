//! Configuration: TOML file, then environment overrides (`.env` is loaded by main)
//!
//! Lookup order for the file: `--config <path>`, then
//! `<config dir>/balance-cli/config.toml`. A missing file means defaults.

pub mod repository;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::balance::labels::{LabelRule, default_rules};
use crate::balance::workbook::RetryPolicy;
use crate::balance::{LabelMapper, LocatorSettings};

const APP_DIR: &str = "balance-cli";

/// Upper bound for debounce and retry delays
const MAX_SECONDS: f64 = 3600.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub source: SourceConfig,
    pub watch: WatchConfig,
    pub retry: RetryConfig,
    pub locator: LocatorConfig,
    pub labels: LabelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory watched for dropped workbooks
    pub data_dir: PathBuf,
    /// SQLite file; defaults to `<data_dir>/balance.db`
    pub db_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR),
            db_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub source_id: String,
    pub dataset_id: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            source_id: "balance-xlsx".to_string(),
            dataset_id: "balance".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub debounce_seconds: f64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig { debounce_seconds: 1.2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub count: u32,
    pub delay_seconds: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            count: 3,
            delay_seconds: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub energy_caption: String,
    pub sales_keywords: Vec<String>,
    pub min_month_headers: usize,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        let settings = LocatorSettings::default();
        LocatorConfig {
            energy_caption: settings.energy_caption,
            sales_keywords: settings.sales_keywords,
            min_month_headers: settings.min_month_headers,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelsConfig {
    pub rules: Vec<LabelRule>,
}

impl Default for LabelsConfig {
    fn default() -> Self {
        LabelsConfig { rules: default_rules() }
    }
}

fn seconds(value: f64) -> Duration {
    if !value.is_finite() {
        return Duration::ZERO;
    }
    Duration::from_millis((value.clamp(0.0, MAX_SECONDS) * 1000.0).round() as u64)
}

fn check_seconds(key: &str, value: f64) -> Result<f64> {
    if !value.is_finite() || !(0.0..=MAX_SECONDS).contains(&value) {
        anyhow::bail!("{} must be between 0 and {} seconds, got {}", key, MAX_SECONDS, value);
    }
    Ok(value)
}

fn parse_seconds(key: &str, value: &str) -> Result<f64> {
    let parsed: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("{} is not a number: {}", key, value))?;
    check_seconds(key, parsed)
}

impl Config {
    /// Default config file path: `<config dir>/balance-cli/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Load the config file (if any), then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match path {
            Some(path) if path.exists() => {
                log::debug!("Loading config from {}", path.display());
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config: {}", path.display()))?;
                Self::from_toml_str(&content)
                    .with_context(|| format!("Failed to parse config: {}", path.display()))?
            }
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        check_seconds("watch.debounce_seconds", config.watch.debounce_seconds)?;
        check_seconds("retry.delay_seconds", config.retry.delay_seconds)?;
        Ok(config)
    }

    /// Apply `DATA_DIR`, `DB_PATH`, `BALANCE_*`, `WATCH_*` and `XLSX_*` overrides
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = get("DB_PATH") {
            self.storage.db_path = Some(PathBuf::from(path));
        }
        if let Some(id) = get("BALANCE_SOURCE_ID") {
            self.source.source_id = id;
        }
        if let Some(id) = get("BALANCE_DATASET_ID") {
            self.source.dataset_id = id;
        }
        if let Some(value) = get("WATCH_DEBOUNCE_SECONDS") {
            self.watch.debounce_seconds = parse_seconds("WATCH_DEBOUNCE_SECONDS", &value)?;
        }
        if let Some(value) = get("XLSX_RETRY_COUNT") {
            self.retry.count = value
                .trim()
                .parse()
                .with_context(|| format!("XLSX_RETRY_COUNT is not an integer: {}", value))?;
        }
        if let Some(value) = get("XLSX_RETRY_DELAY") {
            self.retry.delay_seconds = parse_seconds("XLSX_RETRY_DELAY", &value)?;
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage
            .db_path
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("balance.db"))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry.count.max(1),
            delay: seconds(self.retry.delay_seconds),
        }
    }

    pub fn debounce(&self) -> Duration {
        seconds(self.watch.debounce_seconds)
    }

    pub fn locator_settings(&self) -> LocatorSettings {
        LocatorSettings {
            energy_caption: crate::balance::labels::normalize_label(&self.locator.energy_caption),
            sales_keywords: self.locator.sales_keywords.clone(),
            min_month_headers: self.locator.min_month_headers.max(1),
        }
    }

    /// Label mapper from the configured rule table (overrides are layered on by callers)
    pub fn label_mapper(&self) -> LabelMapper {
        LabelMapper::new(self.labels.rules.clone())
    }
}
