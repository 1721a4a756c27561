//! Table location within a resolved sheet
//!
//! The energy table is found by its caption ("BALANCE DE ENERGÍA EN MWh - AÑO
//! 2024"), not by position: captions move between years and so do columns.
//! Month columns are resolved by header text, so their left-to-right order is
//! irrelevant.

use std::collections::BTreeMap;
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

use super::labels::normalize_label;
use super::months::Month;
use super::workbook::Sheet;

/// Rows scanned above a header row when classifying it as a currency table
const CONTEXT_ROWS: usize = 3;

static YEAR_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").unwrap());

/// Locator settings (caption and keywords come from configuration)
#[derive(Debug, Clone)]
pub struct LocatorSettings {
    /// Normalized caption prefix; the caption must also carry the year
    pub energy_caption: String,
    /// Keywords that mark a header as belonging to the currency table
    pub sales_keywords: Vec<String>,
    /// Month headers required for a row to count as a table header
    pub min_month_headers: usize,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        LocatorSettings {
            energy_caption: "BALANCE DE ENERGIA EN MWH".to_string(),
            sales_keywords: vec![
                "MILLONES".to_string(),
                "SOLES".to_string(),
                "S/".to_string(),
                "MONETARI".to_string(),
            ],
            min_month_headers: 3,
        }
    }
}

/// Row/column extent of one located table
#[derive(Debug, Clone, PartialEq)]
pub struct TableLayout {
    /// Caption row, when the table has one
    pub title_row: Option<usize>,
    pub header_row: usize,
    /// Body rows (exclusive end)
    pub body: Range<usize>,
    /// Column holding row descriptions
    pub label_col: usize,
    /// Month → column index
    pub months: BTreeMap<Month, usize>,
}

/// The expected table is missing from a resolved sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNotFoundError {
    pub year: i32,
    pub sheet_name: String,
    pub reason: String,
}

impl std::fmt::Display for TableNotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no balance table for {} in sheet '{}': {}",
            self.year, self.sheet_name, self.reason
        )
    }
}

impl std::error::Error for TableNotFoundError {}

/// Finds the energy and currency tables of a sheet
pub struct TableLocator<'a> {
    settings: &'a LocatorSettings,
}

impl<'a> TableLocator<'a> {
    pub fn new(settings: &'a LocatorSettings) -> Self {
        TableLocator { settings }
    }

    /// Locate the energy table whose caption names `year`
    pub fn locate_energy(&self, sheet: &Sheet, year: i32) -> Result<TableLayout, TableNotFoundError> {
        let not_found = |reason: String| TableNotFoundError {
            year,
            sheet_name: sheet.name.clone(),
            reason,
        };

        let title_row = self.find_caption(sheet, year).ok_or_else(|| {
            not_found(format!("caption '{} ... {}' not found", self.settings.energy_caption, year))
        })?;

        let header_row = (title_row + 1..sheet.rows.len())
            .find(|&row| self.is_header_row(sheet, row))
            .ok_or_else(|| not_found("no month header row below the caption".to_string()))?;

        Ok(self.layout_from_header(sheet, Some(title_row), header_row))
    }

    /// Locate the currency table anywhere in the sheet except the energy header
    ///
    /// A header row qualifies when one of the few rows above it mentions a
    /// currency keyword. Absence is normal for older files.
    pub fn locate_sales(&self, sheet: &Sheet, energy: &TableLayout) -> Option<TableLayout> {
        (0..sheet.rows.len())
            .filter(|&row| row != energy.header_row)
            .filter(|&row| self.is_header_row(sheet, row))
            .find(|&row| self.has_currency_context(sheet, row))
            .map(|row| self.layout_from_header(sheet, None, row))
    }

    fn find_caption(&self, sheet: &Sheet, year: i32) -> Option<usize> {
        sheet.rows.iter().enumerate().find_map(|(idx, row)| {
            row.iter().find_map(|cell| {
                let text = normalize_label(cell.as_text());
                if !text.contains(&self.settings.energy_caption) {
                    return None;
                }
                let caption_year = YEAR_TOKEN
                    .captures(&text)
                    .and_then(|caps| caps.get(1))
                    .and_then(|m| m.as_str().parse::<i32>().ok());
                (caption_year == Some(year)).then_some(idx)
            })
        })
    }

    fn is_header_row(&self, sheet: &Sheet, row: usize) -> bool {
        let Some(cells) = sheet.rows.get(row) else {
            return false;
        };
        let month_hits = cells
            .iter()
            .filter(|c| Month::from_header(c.as_text()).is_some())
            .count();
        let has_description = cells.iter().any(|c| is_description_header(c.as_text()));
        month_hits >= self.settings.min_month_headers || (has_description && month_hits >= 1)
    }

    fn has_currency_context(&self, sheet: &Sheet, header_row: usize) -> bool {
        let start = header_row.saturating_sub(CONTEXT_ROWS);
        (start..header_row).any(|row| {
            sheet.rows.get(row).is_some_and(|cells| {
                cells.iter().any(|c| {
                    let text = normalize_label(c.as_text());
                    self.settings
                        .sales_keywords
                        .iter()
                        .any(|k| text.contains(&normalize_label(k)))
                })
            })
        })
    }

    fn layout_from_header(&self, sheet: &Sheet, title_row: Option<usize>, header_row: usize) -> TableLayout {
        let header = sheet.rows.get(header_row).map(Vec::as_slice).unwrap_or(&[]);

        let mut months = BTreeMap::new();
        for (col, cell) in header.iter().enumerate() {
            if let Some(month) = Month::from_header(cell.as_text()) {
                // First occurrence wins; later duplicates are usually quarter subtotals
                months.entry(month).or_insert(col);
            }
        }

        // Without a DESCRIPCION header the labels are in the first column
        let label_col = header
            .iter()
            .position(|c| is_description_header(c.as_text()))
            .unwrap_or(0);

        let body_start = header_row + 1;
        let mut body_end = body_start;
        while body_end < sheet.rows.len() {
            if sheet.row_is_blank(body_end) {
                break;
            }
            let label = normalize_label(sheet.cell(body_end, label_col).as_text());
            if label.starts_with("TOTAL") {
                break;
            }
            body_end += 1;
        }

        TableLayout {
            title_row,
            header_row,
            body: body_start..body_end,
            label_col,
            months,
        }
    }
}

fn is_description_header(text: &str) -> bool {
    normalize_label(text).starts_with("DESCRIPCION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::workbook::Cell;

    fn t(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn n(v: f64) -> Cell {
        Cell::Number(v)
    }

    fn sample_sheet() -> Sheet {
        Sheet::new(
            "Balance 2025",
            vec![
                vec![t("BALANCE DE ENERGÍA EN MWh - AÑO 2025")],
                vec![],
                vec![],
                vec![t("DESCRIPCIÓN"), t("Ene"), t("Feb"), t("Mar"), t("Acumulado")],
                vec![t("A emp. Distribuidoras"), n(1000.0), n(1100.0), Cell::Empty, n(2100.0)],
                vec![t("A clientes Libres"), n(500.0), n(600.0), Cell::Empty, n(1100.0)],
                vec![t("TOTAL"), n(1500.0), n(1700.0), Cell::Empty, n(3200.0)],
                vec![],
                vec![t("VENTAS EN MILLONES DE SOLES")],
                vec![t("DESCRIPCIÓN"), t("Ene"), t("Feb"), t("Mar")],
                vec![t("Regulados"), n(10.0), n(11.0), n(12.0)],
            ],
        )
    }

    #[test]
    fn test_locates_energy_table() {
        let settings = LocatorSettings::default();
        let layout = TableLocator::new(&settings)
            .locate_energy(&sample_sheet(), 2025)
            .unwrap();
        assert_eq!(layout.title_row, Some(0));
        assert_eq!(layout.header_row, 3);
        // Stops at the TOTAL row
        assert_eq!(layout.body, 4..6);
        assert_eq!(layout.label_col, 0);
        assert_eq!(layout.months.get(&Month::Ene), Some(&1));
        assert_eq!(layout.months.get(&Month::Mar), Some(&3));
        assert_eq!(layout.months.len(), 3);
    }

    #[test]
    fn test_caption_year_must_match() {
        let settings = LocatorSettings::default();
        let err = TableLocator::new(&settings)
            .locate_energy(&sample_sheet(), 2024)
            .unwrap_err();
        assert_eq!(err.year, 2024);
        assert_eq!(err.sheet_name, "Balance 2025");
    }

    #[test]
    fn test_month_columns_in_any_order() {
        let sheet = Sheet::new(
            "2019",
            vec![
                vec![Cell::Empty, t("Balance de energía en MWh - año 2019")],
                vec![t("Mar"), t("Descripción"), t("Ene"), t("Febrero")],
                vec![n(3.0), t("COES"), n(1.0), n(2.0)],
            ],
        );
        let settings = LocatorSettings::default();
        let layout = TableLocator::new(&settings).locate_energy(&sheet, 2019).unwrap();
        assert_eq!(layout.label_col, 1);
        assert_eq!(layout.months.get(&Month::Mar), Some(&0));
        assert_eq!(layout.months.get(&Month::Ene), Some(&2));
        assert_eq!(layout.months.get(&Month::Feb), Some(&3));
        assert_eq!(layout.body, 2..3);
    }

    #[test]
    fn test_missing_header_is_not_found() {
        let sheet = Sheet::new(
            "2020",
            vec![vec![t("BALANCE DE ENERGIA EN MWH - AÑO 2020")], vec![t("sin datos")]],
        );
        let settings = LocatorSettings::default();
        assert!(TableLocator::new(&settings).locate_energy(&sheet, 2020).is_err());
    }

    #[test]
    fn test_locates_sales_table_below_energy() {
        let settings = LocatorSettings::default();
        let locator = TableLocator::new(&settings);
        let sheet = sample_sheet();
        let energy = locator.locate_energy(&sheet, 2025).unwrap();
        let sales = locator.locate_sales(&sheet, &energy).unwrap();
        assert_eq!(sales.header_row, 9);
        assert_eq!(sales.body, 10..11);
        assert_eq!(sales.title_row, None);
    }

    #[test]
    fn test_locates_sales_table_above_energy() {
        let settings = LocatorSettings::default();
        let locator = TableLocator::new(&settings);
        let sheet = Sheet::new(
            "2024",
            vec![
                vec![t("Ventas en S/ (millones)")],
                vec![t("DESCRIPCIÓN"), t("Ene"), t("Feb"), t("Mar")],
                vec![t("Regulados"), n(10.0), n(11.0), n(12.0)],
                vec![],
                vec![t("BALANCE DE ENERGÍA EN MWh - AÑO 2024")],
                vec![t("DESCRIPCIÓN"), t("Ene"), t("Feb"), t("Mar")],
                vec![t("COES"), n(1.0), n(2.0), n(3.0)],
            ],
        );
        let energy = locator.locate_energy(&sheet, 2024).unwrap();
        assert_eq!(energy.header_row, 5);
        let sales = locator.locate_sales(&sheet, &energy).unwrap();
        assert_eq!(sales.header_row, 1);
        assert_eq!(sales.body, 2..3);
    }

    #[test]
    fn test_energy_header_is_not_a_sales_table() {
        let settings = LocatorSettings::default();
        let locator = TableLocator::new(&settings);
        // Currency keyword right above the energy header
        let sheet = Sheet::new(
            "2024",
            vec![
                vec![t("BALANCE DE ENERGÍA EN MWh - AÑO 2024 (S/ en anexo)")],
                vec![t("DESCRIPCIÓN"), t("Ene"), t("Feb"), t("Mar")],
                vec![t("COES"), n(1.0), n(2.0), n(3.0)],
            ],
        );
        let energy = locator.locate_energy(&sheet, 2024).unwrap();
        assert!(locator.locate_sales(&sheet, &energy).is_none());
    }
}
