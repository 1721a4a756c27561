//! Lenient number parsing for text cells
//!
//! Most cells are stored as numbers, but hand-edited sheets carry text such as
//! "1.234,5", "1,234.5" or "12 345" (with non-breaking spaces).

/// Outcome of reading a text cell as a number
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedNumber {
    Value(f64),
    /// Blank or a placeholder dash
    Missing,
    /// Text that does not look like a number
    Invalid,
}

/// Parse a text cell using the separator heuristics of the source files
pub fn parse_number(raw: &str) -> ParsedNumber {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();
    if compact.is_empty() || compact.chars().all(|c| c == '-' || c == '\u{2013}') {
        return ParsedNumber::Missing;
    }

    // Anything beyond digits, separators and a sign is not a number we accept
    if compact
        .chars()
        .any(|c| !(c.is_ascii_digit() || c == ',' || c == '.' || c == '-' || c == '+'))
    {
        return ParsedNumber::Invalid;
    }
    if !compact.chars().any(|c| c.is_ascii_digit()) {
        return ParsedNumber::Invalid;
    }

    let commas = compact.matches(',').count();
    let dots = compact.matches('.').count();
    let text = if commas == 1 && dots == 0 {
        // "1234,5" - decimal comma
        compact.replace(',', ".")
    } else if commas == 0 && dots > 1 {
        // "1.234.567" - dots as thousands separators
        compact.replace('.', "")
    } else if commas > 1 && dots == 0 {
        compact.replace(',', "")
    } else if commas >= 1 && dots == 1 {
        match (compact.rfind('.'), compact.rfind(',')) {
            // "1.234,5"
            (Some(dot), Some(comma)) if dot < comma => compact.replace('.', "").replace(',', "."),
            // "1,234.5"
            _ => compact.replace(',', ""),
        }
    } else if commas == 1 && dots > 1 {
        // "1.234.567,8"
        compact.replace('.', "").replace(',', ".")
    } else {
        compact
    };

    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => ParsedNumber::Value(value),
        _ => ParsedNumber::Invalid,
    }
}
