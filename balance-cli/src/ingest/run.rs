//! Run records and run-level errors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::balance::IngestWarning;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Warning,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Warning => "WARNING",
            RunStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(RunStatus::Success),
            "WARNING" => Some(RunStatus::Warning),
            "ERROR" => Some(RunStatus::Error),
            _ => None,
        }
    }

    /// Whether a run with this status publishes a snapshot
    pub fn publishes(&self) -> bool {
        !matches!(self, RunStatus::Error)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finalized ingestion run (append-only history)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRun {
    pub id: String,
    pub dataset_id: String,
    pub source_id: String,
    pub ran_at: DateTime<Utc>,
    pub status: RunStatus,
    pub parser_name: String,
    pub message: String,
    pub warnings: Vec<IngestWarning>,
}

impl IngestionRun {
    pub fn warning_lines(&self) -> Vec<String> {
        self.warnings.iter().map(|w| w.to_string()).collect()
    }
}

/// Reasons a run cannot start at all
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    AlreadyRunning { source_id: String },
    SourceDisabled { source_id: String },
    UnknownSource { source_id: String },
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::AlreadyRunning { source_id } => {
                write!(f, "an ingestion run is already in progress for source '{}'", source_id)
            }
            IngestError::SourceDisabled { source_id } => write!(f, "source '{}' is disabled", source_id),
            IngestError::UnknownSource { source_id } => write!(f, "unknown source '{}'", source_id),
        }
    }
}

impl std::error::Error for IngestError {}
