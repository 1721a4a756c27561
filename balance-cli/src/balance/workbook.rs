//! Decoded workbook grid and the calamine-backed loader
//!
//! The engine never touches calamine types directly: a workbook is decoded once
//! into plain sheets → rows → cells, which keeps every later stage a pure
//! function over owned data (and trivially constructible in tests).

use std::path::Path;
use std::time::Duration;

use calamine::{Data, Reader, open_workbook_auto};

use super::numbers::{ParsedNumber, parse_number};

/// A single decoded cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    /// Spreadsheet error value such as `#REF!`
    Error(String),
}

impl Cell {
    /// Text content for label/header matching ("" for non-text cells)
    pub fn as_text(&self) -> &str {
        match self {
            Cell::Text(s) => s.as_str(),
            _ => "",
        }
    }

    /// Read the cell as a number, parsing numeric text leniently
    pub fn as_number(&self) -> ParsedNumber {
        match self {
            Cell::Number(n) => ParsedNumber::Value(*n),
            Cell::Empty => ParsedNumber::Missing,
            Cell::Text(s) => parse_number(s),
            Cell::Bool(_) | Cell::Error(_) => ParsedNumber::Invalid,
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Short rendering for warnings
    pub fn describe(&self) -> String {
        match self {
            Cell::Empty => "<empty>".to_string(),
            Cell::Number(n) => n.to_string(),
            Cell::Text(s) => format!("{:?}", s),
            Cell::Bool(b) => b.to_string(),
            Cell::Error(e) => e.clone(),
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::String(s) => Cell::Text(s.clone()),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) => Cell::Number(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::Error(e) => Cell::Error(e.to_string()),
        }
    }
}

/// One worksheet as a dense grid
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub name: String,
    /// Absolute (row, col) of the grid's first cell, for A1 references
    pub origin: (u32, u32),
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<Cell>>) -> Self {
        Sheet {
            name: name.into(),
            origin: (0, 0),
            rows,
        }
    }

    /// Cell at grid coordinates, `Empty` when out of range
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        static EMPTY: Cell = Cell::Empty;
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }

    pub fn row_is_blank(&self, row: usize) -> bool {
        self.rows
            .get(row)
            .map(|r| r.iter().all(Cell::is_blank))
            .unwrap_or(true)
    }

    /// A1-style reference for grid coordinates ("C7")
    pub fn cell_ref(&self, row: usize, col: usize) -> String {
        let abs_row = self.origin.0 as usize + row + 1;
        let mut abs_col = self.origin.1 as usize + col + 1;
        let mut letters = Vec::new();
        while abs_col > 0 {
            let rem = (abs_col - 1) % 26;
            letters.push((b'A' + rem as u8) as char);
            abs_col = (abs_col - 1) / 26;
        }
        letters.reverse();
        format!("{}{}", letters.into_iter().collect::<String>(), abs_row)
    }
}

/// A decoded workbook: sheets in workbook order
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new(sheets: Vec<Sheet>) -> Self {
        Workbook { sheets }
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }
}

/// Fatal failure to obtain a usable workbook
#[derive(Debug, Clone)]
pub enum WorkbookError {
    NotFound { path: String },
    UnsupportedFile { path: String },
    Unreadable { path: String, message: String },
    SheetUnreadable { sheet: String, message: String },
}

impl std::fmt::Display for WorkbookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkbookError::NotFound { path } => write!(f, "workbook not found: {}", path),
            WorkbookError::UnsupportedFile { path } => {
                write!(f, "not a spreadsheet workbook (expected .xlsx/.xlsm/.xls/.ods): {}", path)
            }
            WorkbookError::Unreadable { path, message } => {
                write!(f, "failed to open workbook {}: {}", path, message)
            }
            WorkbookError::SheetUnreadable { sheet, message } => {
                write!(f, "failed to read sheet '{}': {}", sheet, message)
            }
        }
    }
}

impl std::error::Error for WorkbookError {}

/// Retry policy for opening a workbook that may still be being written
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(800),
        }
    }
}

/// Whether a path looks like an ingestible workbook (skips `~$` lock files)
pub fn is_workbook_path(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if name.starts_with("~$") {
        return false;
    }
    matches!(
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .as_deref(),
        Some("xlsx" | "xlsm" | "xls" | "ods")
    )
}

/// Open and decode a workbook, retrying transient failures
///
/// Blocking: call from `spawn_blocking` in async contexts.
pub fn load(path: &Path, retry: RetryPolicy) -> Result<Workbook, WorkbookError> {
    let display = path.display().to_string();
    if !is_workbook_path(path) {
        return Err(WorkbookError::UnsupportedFile { path: display });
    }

    let attempts = retry.attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        if !path.exists() {
            return Err(WorkbookError::NotFound { path: display });
        }
        match load_once(path) {
            Ok(workbook) => return Ok(workbook),
            Err(e) => {
                if attempt < attempts {
                    log::warn!(
                        "Attempt {}/{} to open {} failed ({}), retrying in {:.1}s",
                        attempt,
                        attempts,
                        display,
                        e,
                        retry.delay.as_secs_f64()
                    );
                    std::thread::sleep(retry.delay);
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or(WorkbookError::Unreadable {
        path: display,
        message: "no attempts made".to_string(),
    }))
}

fn load_once(path: &Path) -> Result<Workbook, WorkbookError> {
    let display = path.display().to_string();
    let mut workbook = open_workbook_auto(path).map_err(|e| WorkbookError::Unreadable {
        path: display.clone(),
        message: e.to_string(),
    })?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| WorkbookError::SheetUnreadable {
                sheet: name.clone(),
                message: e.to_string(),
            })?;

        let rows: Vec<Vec<Cell>> = range
            .rows()
            .map(|row| row.iter().map(Cell::from).collect())
            .collect();

        sheets.push(Sheet {
            name,
            origin: range.start().unwrap_or((0, 0)),
            rows,
        });
    }

    log::debug!("Decoded {} sheets from {}", sheets.len(), display);
    Ok(Workbook { sheets })
}
