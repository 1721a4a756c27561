//! Sheet version resolution
//!
//! A workbook carries one sheet per reporting year, often in several revisions
//! ("2020", "2020 R1", "2020 R2", "2016 (rev3)", "2025V1"). Resolution is a pure
//! function of the sheet names: group by year, rank revisions, keep the single
//! strictly highest one.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::labels::fold_diacritics;

/// Revision of a sheet, ordered from least to most authoritative
///
/// Variant order drives the derived `Ord`: `Base < Rev(n) < V1 < R1 < R2`, and
/// `Rev` variants compare by their number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Revision {
    Base,
    Rev(u32),
    V1,
    R1,
    R2,
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Revision::Base => write!(f, "BASE"),
            Revision::Rev(n) => write!(f, "REV{}", n),
            Revision::V1 => write!(f, "V1"),
            Revision::R1 => write!(f, "R1"),
            Revision::R2 => write!(f, "R2"),
        }
    }
}

/// A sheet competing for a reporting year
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetCandidate {
    pub year: i32,
    pub revision: Revision,
    pub sheet_name: String,
}

/// Two or more sheets tie for the top revision of a year
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionError {
    pub year: i32,
    pub revision: Revision,
    pub sheets: Vec<String>,
}

impl std::fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ambiguous sheets for {} at revision {}: {}",
            self.year,
            self.revision,
            self.sheets.join(", ")
        )
    }
}

impl std::error::Error for ResolutionError {}

/// Outcome of resolving one workbook's sheet names
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Winning sheet per year
    pub winners: BTreeMap<i32, SheetCandidate>,
    /// Candidates that lost to a higher revision
    pub discarded: Vec<SheetCandidate>,
    /// Sheets without a year token
    pub skipped: Vec<String>,
    /// Years excluded because their top revision is not unique
    pub errors: Vec<ResolutionError>,
}

impl Resolution {
    pub fn winner(&self, year: i32) -> Option<&SheetCandidate> {
        self.winners.get(&year)
    }
}

static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").unwrap());
static R2: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bR\s*-?\s*2\b").unwrap());
static R1: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bR\s*-?\s*1\b").unwrap());
static V1: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bV\s*-?\s*1\b").unwrap());
static REV: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bREV(?:ISION)?\s*[-.]?\s*(\d+)?").unwrap());

/// Uppercase, fold accents and split letter/digit runs ("2025V1" → "2025 V 1")
fn tokenize_name(name: &str) -> String {
    let folded = fold_diacritics(name).to_uppercase();
    let mut out = String::with_capacity(folded.len() + 8);
    let mut prev: Option<char> = None;
    for c in folded.chars() {
        if let Some(p) = prev {
            let boundary = (p.is_ascii_digit() && c.is_alphabetic())
                || (p.is_alphabetic() && c.is_ascii_digit());
            if boundary {
                out.push(' ');
            }
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

/// Extract the reporting year from a sheet name, anywhere in the name
pub fn extract_year(sheet_name: &str) -> Option<i32> {
    let spaced = tokenize_name(sheet_name);
    YEAR.captures(&spaced)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Rank a sheet name's revision token, checking R2, R1, V1, REV<n> in that order
pub fn revision_of(sheet_name: &str) -> Revision {
    let spaced = tokenize_name(sheet_name);
    if R2.is_match(&spaced) {
        return Revision::R2;
    }
    if R1.is_match(&spaced) {
        return Revision::R1;
    }
    if V1.is_match(&spaced) {
        return Revision::V1;
    }
    let rev = REV
        .captures_iter(&spaced)
        .map(|caps| {
            caps.get(1)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(0)
        })
        .max();
    match rev {
        Some(n) => Revision::Rev(n),
        None => Revision::Base,
    }
}

/// Pick one authoritative sheet per year
pub fn resolve<S: AsRef<str>>(sheet_names: &[S]) -> Resolution {
    let mut resolution = Resolution::default();
    let mut by_year: BTreeMap<i32, Vec<SheetCandidate>> = BTreeMap::new();

    for name in sheet_names {
        let name = name.as_ref();
        match extract_year(name) {
            Some(year) => by_year.entry(year).or_default().push(SheetCandidate {
                year,
                revision: revision_of(name),
                sheet_name: name.to_string(),
            }),
            None => {
                log::info!("Skipping sheet '{}' (no year in name)", name);
                resolution.skipped.push(name.to_string());
            }
        }
    }

    for (year, mut candidates) in by_year {
        // Stable sort keeps workbook order among equals for reporting
        candidates.sort_by(|a, b| b.revision.cmp(&a.revision));
        let top = candidates[0].revision;
        let tied = candidates.iter().filter(|c| c.revision == top).count();

        if tied > 1 {
            let error = ResolutionError {
                year,
                revision: top,
                sheets: candidates
                    .iter()
                    .filter(|c| c.revision == top)
                    .map(|c| c.sheet_name.clone())
                    .collect(),
            };
            log::warn!("Excluding year {}: {}", year, error);
            resolution.errors.push(error);
            resolution.discarded.extend(candidates);
            continue;
        }

        let mut rest = candidates.into_iter();
        if let Some(winner) = rest.next() {
            log::info!(
                "Selected sheet '{}' for {} (revision {})",
                winner.sheet_name,
                year,
                winner.revision
            );
            for loser in rest {
                log::info!(
                    "Discarding sheet '{}' for {} (superseded by {})",
                    loser.sheet_name,
                    year,
                    winner.revision
                );
                resolution.discarded.push(loser);
            }
            resolution.winners.insert(year, winner);
        }
    }

    resolution
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_anywhere_in_name() {
        assert_eq!(extract_year("2020"), Some(2020));
        assert_eq!(extract_year("Balance 2025"), Some(2025));
        assert_eq!(extract_year("2018-R2 (LDS)"), Some(2018));
        assert_eq!(extract_year("2025V1"), Some(2025));
        assert_eq!(extract_year("Hoja (fuente COES) 2019 R1"), Some(2019));
        assert_eq!(extract_year("R"), None);
        assert_eq!(extract_year("Perfil"), None);
        assert_eq!(extract_year("Tabla 12345"), None);
        assert_eq!(extract_year("1850"), None);
    }

    #[test]
    fn test_revision_tokens() {
        assert_eq!(revision_of("2020"), Revision::Base);
        assert_eq!(revision_of("2020 R1"), Revision::R1);
        assert_eq!(revision_of("2020 R2"), Revision::R2);
        assert_eq!(revision_of("2018-R2 (LDS)"), Revision::R2);
        assert_eq!(revision_of("2021-r1"), Revision::R1);
        assert_eq!(revision_of("2025V1"), Revision::V1);
        assert_eq!(revision_of("2016 (rev3)"), Revision::Rev(3));
        assert_eq!(revision_of("2016 REV-12"), Revision::Rev(12));
        assert_eq!(revision_of("2016 rev"), Revision::Rev(0));
        assert_eq!(revision_of("2022 (R1)"), Revision::R1);
    }

    #[test]
    fn test_rank_order_is_total() {
        let mut revisions = vec![
            Revision::Rev(2),
            Revision::R1,
            Revision::Base,
            Revision::R2,
            Revision::Rev(10),
            Revision::V1,
        ];
        revisions.sort();
        assert_eq!(
            revisions,
            vec![
                Revision::Base,
                Revision::Rev(2),
                Revision::Rev(10),
                Revision::V1,
                Revision::R1,
                Revision::R2,
            ]
        );
    }

    #[test]
    fn test_r2_beats_r1_and_base() {
        let resolution = resolve(&["2020", "2020 R1", "2020 R2"]);
        assert_eq!(resolution.winner(2020).unwrap().sheet_name, "2020 R2");
        assert_eq!(resolution.discarded.len(), 2);
        assert!(resolution.errors.is_empty());
    }

    #[test]
    fn test_rev_beats_base() {
        let resolution = resolve(&["2016", "2016 (rev3)"]);
        assert_eq!(resolution.winner(2016).unwrap().sheet_name, "2016 (rev3)");
    }

    #[test]
    fn test_full_workbook() {
        let names = [
            "2016 (rev3)",
            "2017",
            "2018",
            "2018-R1",
            "2018-R2 (LDS)",
            "2019",
            "2019-R1",
            "2019-R2",
            "2020",
            "2020 R1",
            "2020 R2",
            "2021",
            "2021-R1",
            "2021-R2",
            "2022",
            "2022-R1",
            "2022-R2",
            "2023",
            "2023-R1",
            "2024",
            "2024-R1",
            "2025",
            "2025V1",
            "R",
            "Perfil",
        ];
        let resolution = resolve(&names);
        let years: Vec<i32> = resolution.winners.keys().copied().collect();
        assert_eq!(years, (2016..=2025).collect::<Vec<_>>());
        assert_eq!(resolution.winner(2018).unwrap().sheet_name, "2018-R2 (LDS)");
        assert_eq!(resolution.winner(2019).unwrap().sheet_name, "2019-R2");
        assert_eq!(resolution.winner(2022).unwrap().sheet_name, "2022-R2");
        assert_eq!(resolution.winner(2023).unwrap().sheet_name, "2023-R1");
        assert_eq!(resolution.winner(2025).unwrap().sheet_name, "2025V1");
        assert_eq!(resolution.skipped, vec!["R".to_string(), "Perfil".to_string()]);
    }

    #[test]
    fn test_tie_is_reported_not_guessed() {
        let resolution = resolve(&["2021 R1", "2021-R1 (copia)", "2022"]);
        assert!(resolution.winner(2021).is_none());
        assert_eq!(resolution.errors.len(), 1);
        assert_eq!(resolution.errors[0].year, 2021);
        assert_eq!(resolution.errors[0].revision, Revision::R1);
        assert_eq!(resolution.errors[0].sheets.len(), 2);
        assert_eq!(resolution.winner(2022).unwrap().sheet_name, "2022");
    }

    #[test]
    fn test_higher_rev_number_wins() {
        let resolution = resolve(&["2017 rev2", "2017 rev10", "2017"]);
        assert_eq!(resolution.winner(2017).unwrap().sheet_name, "2017 rev10");
    }
}
