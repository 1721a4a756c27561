//! Non-fatal ingestion findings
//!
//! Everything below a workbook failure is accumulated rather than raised: it is
//! attached to the finalized run and to the published snapshot.

use serde::{Deserialize, Serialize};

use super::months::Month;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningKind {
    /// Competing sheets for a year could not be ranked
    Resolution,
    /// The resolved sheet has no recognizable balance table
    TableNotFound,
    /// A mapped cell was non-numeric or missing
    CellParse,
    /// Two cells landed on the same (category, month)
    DuplicateCell,
    /// Row label not in the category table
    UnmappedLabel,
    /// Row label matched several categories equally well
    AmbiguousLabel,
    /// Month columns present but not reported yet
    MonthsWithoutData,
    /// Sheet without a year token
    SheetSkipped,
}

impl WarningKind {
    pub fn label(&self) -> &'static str {
        match self {
            WarningKind::Resolution => "ResolutionError",
            WarningKind::TableNotFound => "TableNotFoundError",
            WarningKind::CellParse => "CellParseWarning",
            WarningKind::DuplicateCell => "DuplicateCellWarning",
            WarningKind::UnmappedLabel => "UnmappedLabelWarning",
            WarningKind::AmbiguousLabel => "AmbiguousLabelWarning",
            WarningKind::MonthsWithoutData => "MonthsWithoutData",
            WarningKind::SheetSkipped => "SheetSkipped",
        }
    }
}

/// One accumulated finding, scoped to a year and optionally a month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestWarning {
    pub kind: WarningKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<Month>,
    pub message: String,
}

impl IngestWarning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        IngestWarning {
            kind,
            year: None,
            month: None,
            message: message.into(),
        }
    }

    pub fn for_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn for_month(mut self, month: Month) -> Self {
        self.month = Some(month);
        self
    }
}

impl std::fmt::Display for IngestWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.year, self.month) {
            (Some(year), Some(month)) => {
                write!(f, "[{}] {} {}: {}", self.kind.label(), year, month, self.message)
            }
            (Some(year), None) => write!(f, "[{}] {}: {}", self.kind.label(), year, self.message),
            _ => write!(f, "[{}] {}", self.kind.label(), self.message),
        }
    }
}
