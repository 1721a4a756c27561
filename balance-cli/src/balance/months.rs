//! Calendar months as they appear in the report's column headers

use serde::{Deserialize, Serialize};

use super::labels::fold_diacritics;

/// Reporting month, ordered by calendar position (not by name)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Month {
    Ene,
    Feb,
    Mar,
    Abr,
    May,
    Jun,
    Jul,
    Ago,
    Set,
    Oct,
    Nov,
    Dic,
}

/// Header spellings seen across a decade of files, folded to lowercase ASCII.
/// Matched as prefixes so "Ene-25" or "Enero 2025" still resolve.
const ALIASES: &[(&str, Month)] = &[
    ("enero", Month::Ene),
    ("ene", Month::Ene),
    ("febrero", Month::Feb),
    ("feb", Month::Feb),
    ("marzo", Month::Mar),
    ("mar", Month::Mar),
    ("abril", Month::Abr),
    ("abr", Month::Abr),
    ("mayo", Month::May),
    ("may", Month::May),
    ("junio", Month::Jun),
    ("jun", Month::Jun),
    ("julio", Month::Jul),
    ("jul", Month::Jul),
    ("agosto", Month::Ago),
    ("ago", Month::Ago),
    ("septiembre", Month::Set),
    ("setiembre", Month::Set),
    ("sept", Month::Set),
    ("sep", Month::Set),
    ("set", Month::Set),
    ("octubre", Month::Oct),
    ("oct", Month::Oct),
    ("noviembre", Month::Nov),
    ("nov", Month::Nov),
    ("diciembre", Month::Dic),
    ("dic", Month::Dic),
];

impl Month {
    /// All months in calendar order
    pub const ALL: [Month; 12] = [
        Month::Ene,
        Month::Feb,
        Month::Mar,
        Month::Abr,
        Month::May,
        Month::Jun,
        Month::Jul,
        Month::Ago,
        Month::Set,
        Month::Oct,
        Month::Nov,
        Month::Dic,
    ];

    /// 1-based calendar index (Ene = 1)
    pub fn index(&self) -> u32 {
        *self as u32 + 1
    }

    /// Convert from a 1-based calendar index
    pub fn from_index(idx: u32) -> Option<Self> {
        if (1..=12).contains(&idx) {
            Some(Self::ALL[(idx - 1) as usize])
        } else {
            None
        }
    }

    /// Three-letter label used in published points
    pub fn label(&self) -> &'static str {
        match self {
            Month::Ene => "Ene",
            Month::Feb => "Feb",
            Month::Mar => "Mar",
            Month::Abr => "Abr",
            Month::May => "May",
            Month::Jun => "Jun",
            Month::Jul => "Jul",
            Month::Ago => "Ago",
            Month::Set => "Set",
            Month::Oct => "Oct",
            Month::Nov => "Nov",
            Month::Dic => "Dic",
        }
    }

    /// Resolve a column header to a month, ignoring case, accents and suffixes
    pub fn from_header(header: &str) -> Option<Self> {
        let folded = fold_diacritics(header.trim()).to_lowercase();
        if folded.is_empty() {
            return None;
        }
        ALIASES.iter().find_map(|(alias, month)| {
            let rest = folded.strip_prefix(alias)?;
            // Reject words that merely start with an alias ("marca", "mayor")
            match rest.chars().next() {
                None => Some(*month),
                Some(c) if !c.is_alphabetic() => Some(*month),
                _ => None,
            }
        })
    }
}

impl std::fmt::Display for Month {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
