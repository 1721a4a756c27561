//! Row label normalization and label → category mapping
//!
//! Row descriptions drift across a decade of files ("A emp. Distribuidoras",
//! "A EMP DISTRIBUIDORAS:", "Pérdidas Sistemas Transmisión"). Labels are first
//! canonicalized, then looked up in a data-driven rule table. Rules come from
//! configuration; operator overrides (exact labels) are layered on top.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Closed set of energy categories published by the balance dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CategoryCode {
    Regulados,
    Libres,
    CoesSpot,
    Perdidas,
    ServiciosAux,
}

impl CategoryCode {
    pub const ALL: [CategoryCode; 5] = [
        CategoryCode::Regulados,
        CategoryCode::Libres,
        CategoryCode::CoesSpot,
        CategoryCode::Perdidas,
        CategoryCode::ServiciosAux,
    ];

    /// Stable code used in storage and configuration
    pub fn code(&self) -> &'static str {
        match self {
            CategoryCode::Regulados => "REGULADOS",
            CategoryCode::Libres => "LIBRES",
            CategoryCode::CoesSpot => "COES_SPOT",
            CategoryCode::Perdidas => "PERDIDAS",
            CategoryCode::ServiciosAux => "SERVICIOS_AUX",
        }
    }

    /// Parse a stored/configured code (case-insensitive)
    pub fn from_code(code: &str) -> Option<Self> {
        let upper = code.trim().to_uppercase();
        Self::ALL.into_iter().find(|c| c.code() == upper)
    }

    /// Market categories are the ones traded in the sales section of the table
    pub fn is_market(&self) -> bool {
        matches!(
            self,
            CategoryCode::Regulados | CategoryCode::Libres | CategoryCode::CoesSpot
        )
    }
}

impl std::fmt::Display for CategoryCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SPACED_HYPHEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*-\s*").unwrap());

/// Strip combining marks after NFKD decomposition ("Pérdidas" → "Perdidas")
pub fn fold_diacritics(text: &str) -> String {
    text.nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect()
}

/// Canonicalize a raw row label
///
/// Steps: trim, fold diacritics, uppercase, collapse whitespace, unify dash
/// variants into a single tight hyphen, strip trailing colons. Every step is
/// idempotent, so normalizing a normalized label is a no-op.
pub fn normalize_label(raw: &str) -> String {
    let folded = fold_diacritics(raw.trim()).to_uppercase();
    let dashed: String = folded
        .chars()
        .map(|c| match c {
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}'
            | '\u{2212}' => '-',
            c => c,
        })
        .collect();
    let collapsed = WHITESPACE.replace_all(dashed.trim(), " ");
    let hyphenated = SPACED_HYPHEN.replace_all(&collapsed, "-");
    hyphenated
        .trim_end_matches(|c: char| c == ':' || c.is_whitespace())
        .to_string()
}

/// How a rule's terms are compared against a normalized label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Label equals the single term
    Exact,
    /// Label starts with the term
    Prefix,
    /// Label ends with the term
    Suffix,
    /// Label contains every term
    Contains,
}

impl MatchKind {
    fn rank(&self) -> u8 {
        match self {
            MatchKind::Exact => 2,
            MatchKind::Prefix | MatchKind::Suffix => 1,
            MatchKind::Contains => 0,
        }
    }
}

/// One row of the label → category table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRule {
    pub kind: MatchKind,
    pub terms: Vec<String>,
    pub category: CategoryCode,
}

impl LabelRule {
    pub fn new(kind: MatchKind, terms: &[&str], category: CategoryCode) -> Self {
        LabelRule {
            kind,
            terms: terms.iter().map(|t| normalize_label(t)).collect(),
            category,
        }
    }

    fn matches(&self, label: &str) -> bool {
        if self.terms.is_empty() {
            return false;
        }
        match self.kind {
            MatchKind::Exact => self.terms.iter().any(|t| label == t),
            MatchKind::Prefix => self.terms.iter().any(|t| label.starts_with(t.as_str())),
            MatchKind::Suffix => self.terms.iter().any(|t| label.ends_with(t.as_str())),
            MatchKind::Contains => self.terms.iter().all(|t| label.contains(t.as_str())),
        }
    }

    /// Specificity of a match: exact beats anchored beats contains, then longer text wins
    fn specificity(&self, label: &str) -> (u8, usize) {
        let len = match self.kind {
            MatchKind::Contains => self.terms.iter().map(|t| t.len()).sum(),
            _ => self
                .terms
                .iter()
                .filter(|t| match self.kind {
                    MatchKind::Exact => label == t.as_str(),
                    MatchKind::Prefix => label.starts_with(t.as_str()),
                    _ => label.ends_with(t.as_str()),
                })
                .map(|t| t.len())
                .max()
                .unwrap_or(0),
        };
        (self.kind.rank(), len)
    }
}

/// Default rule table for the energy balance report
pub fn default_rules() -> Vec<LabelRule> {
    use CategoryCode::*;
    use MatchKind::*;
    vec![
        LabelRule::new(Exact, &["A EMP. DISTRIBUIDORAS", "A EMP DISTRIBUIDORAS"], Regulados),
        LabelRule::new(Suffix, &["DISTRIBUIDORAS"], Regulados),
        LabelRule::new(Exact, &["MERCADO REGULADO", "REGULADOS"], Regulados),
        LabelRule::new(Exact, &["A CLIENTES LIBRES"], Libres),
        LabelRule::new(Suffix, &["CLIENTES LIBRES"], Libres),
        LabelRule::new(Exact, &["MERCADO LIBRE", "LIBRES"], Libres),
        LabelRule::new(Exact, &["COES", "COES-SPOT", "COES SPOT", "MERCADO SPOT", "SPOT"], CoesSpot),
        LabelRule::new(Contains, &["PERDIDAS", "TRANSMISION"], Perdidas),
        LabelRule::new(Contains, &["SERVICIOS AUXILIARES"], ServiciosAux),
        LabelRule::new(Contains, &["CONSUMO PROPIO DE CENTRALES"], ServiciosAux),
        LabelRule::new(Exact, &["SSAA"], ServiciosAux),
    ]
}

/// Structural rows that open a section of the energy table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Sales,
    Purchases,
}

/// Detect "VENTA DE ENERGIA" / "COMPRA DE ENERGIA" section headers
pub fn detect_section(label: &str) -> Option<Section> {
    if label.starts_with("VENTA DE ENER") || label.starts_with("VENTA ENER") {
        return Some(Section::Sales);
    }
    if label.starts_with("COMPRA DE ENER") || label.starts_with("COMPRA ENER") {
        return Some(Section::Purchases);
    }
    None
}

/// Result of classifying one normalized label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelMatch {
    Category(CategoryCode),
    /// Equally specific rules disagree on the category
    Ambiguous(Vec<CategoryCode>),
    Unmapped,
}

/// Static dispatch table from normalized labels to categories
#[derive(Debug, Clone)]
pub struct LabelMapper {
    overrides: HashMap<String, CategoryCode>,
    rules: Vec<LabelRule>,
}

impl Default for LabelMapper {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl LabelMapper {
    pub fn new(rules: Vec<LabelRule>) -> Self {
        // Terms may come from hand-edited config, so canonicalize them here too
        let rules = rules
            .into_iter()
            .map(|mut r| {
                r.terms = r.terms.iter().map(|t| normalize_label(t)).collect();
                r
            })
            .collect();
        LabelMapper {
            overrides: HashMap::new(),
            rules,
        }
    }

    /// Layer operator overrides (exact labels) on top of the rule table
    pub fn with_overrides(mut self, overrides: HashMap<String, CategoryCode>) -> Self {
        self.overrides = overrides
            .into_iter()
            .map(|(label, category)| (normalize_label(&label), category))
            .collect();
        self
    }

    /// Classify an already-normalized label
    pub fn classify(&self, normalized: &str) -> LabelMatch {
        if normalized.is_empty() {
            return LabelMatch::Unmapped;
        }
        if let Some(category) = self.overrides.get(normalized) {
            return LabelMatch::Category(*category);
        }

        let mut best: Option<(u8, usize)> = None;
        let mut winners: Vec<CategoryCode> = Vec::new();
        for rule in self.rules.iter().filter(|r| r.matches(normalized)) {
            let spec = rule.specificity(normalized);
            match best {
                Some(current) if spec < current => {}
                Some(current) if spec == current => {
                    if !winners.contains(&rule.category) {
                        winners.push(rule.category);
                    }
                }
                _ => {
                    best = Some(spec);
                    winners = vec![rule.category];
                }
            }
        }

        match winners.len() {
            0 => LabelMatch::Unmapped,
            1 => LabelMatch::Category(winners[0]),
            _ => {
                winners.sort();
                LabelMatch::Ambiguous(winners)
            }
        }
    }

    /// Normalize a raw label and classify it
    pub fn map_raw(&self, raw: &str) -> (String, LabelMatch) {
        let normalized = normalize_label(raw);
        let matched = self.classify(&normalized);
        (normalized, matched)
    }
}
