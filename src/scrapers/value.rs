//! Turns raw scraped text into a numeric quantity plus a unit classification.
//!
//! Pure functions, no I/O. Prices distinguish major currency units (pounds,
//! dollars) from minor units (pence, cents); benchmark levels have no such
//! distinction.

/// Parsed price text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPrice {
    /// None when the text did not contain a parseable number.
    pub value: Option<f64>,
    pub unit_is_minor: bool,
    pub raw: String,
}

/// Parsed benchmark level text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLevel {
    pub value: Option<f64>,
    pub raw: String,
}

/// Currency symbols that mark a value as quoted in major units.
const CURRENCY_SYMBOLS: &[char] = &['£', '$', '€', '¥', '₹', '₩'];

/// Trailing markers that mark a value as quoted in minor units
/// (pence, cents). Checked before generic currency-code detection so
/// "GBX" is not mistaken for a major-unit code.
const MINOR_UNIT_SUFFIXES: &[&str] = &["pence", "gbx", "p", "c", "¢"];

/// Parse price text.
///
/// `assume_minor` is the per-site default applied when the text carries no
/// unit indicator at all. The common provider format is minor-unit-only, so
/// sites default to `true`; a site config can override this, since a wrong
/// default is a silent 100x valuation error.
pub fn parse_price(raw: &str, assume_minor: bool) -> ParsedPrice {
    let cleaned = raw.replace('\u{a0}', " ");
    let mut text = cleaned.trim().to_string();
    let mut indicator: Option<bool> = None; // Some(true) = minor, Some(false) = major

    // A currency symbol anywhere means the number is already in major units.
    if text.contains(CURRENCY_SYMBOLS) {
        indicator = Some(false);
        text.retain(|c| !CURRENCY_SYMBOLS.contains(&c));
        text = text.trim().to_string();
    }

    // Trailing minor-unit marker, e.g. "123.45p" or "123.45 GBX".
    if indicator.is_none() {
        if let Some(stripped) = strip_minor_suffix(&text) {
            indicator = Some(true);
            text = stripped;
        }
    }

    // Leading or trailing 2-4 letter currency code, e.g. "GBP 12.34".
    // A code always means major units, even when a suffix is also present.
    if let Some(stripped) = strip_currency_code(&text) {
        indicator = Some(false);
        text = stripped;
    }

    let value = parse_number(&text);

    ParsedPrice {
        value,
        unit_is_minor: indicator.unwrap_or(assume_minor),
        raw: raw.to_string(),
    }
}

/// Parse benchmark level text. Same numeric cleanup as prices, no unit
/// classification.
pub fn parse_level(raw: &str) -> ParsedLevel {
    let cleaned = raw.replace('\u{a0}', " ");
    let mut text = cleaned.trim().to_string();
    text.retain(|c| !CURRENCY_SYMBOLS.contains(&c));
    if let Some(stripped) = strip_minor_suffix(&text) {
        text = stripped;
    }
    if let Some(stripped) = strip_currency_code(&text) {
        text = stripped;
    }

    ParsedLevel {
        value: parse_number(&text),
        raw: raw.to_string(),
    }
}

/// Normalize a parsed price to minor units, rounded to 4 decimal places.
pub fn normalise_to_minor_unit(value: f64, unit_is_minor: bool) -> f64 {
    if unit_is_minor {
        round4(value)
    } else {
        round4(value * 100.0)
    }
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Strip a trailing minor-unit marker, returning the remainder. The marker
/// must follow a digit (possibly with whitespace) so plain words don't match.
fn strip_minor_suffix(text: &str) -> Option<String> {
    let lower = text.trim_end().to_lowercase();
    for suffix in MINOR_UNIT_SUFFIXES {
        if let Some(rest) = lower.strip_suffix(suffix) {
            let rest = rest.trim_end();
            if rest.chars().last().is_some_and(|c| c.is_ascii_digit()) {
                // Digits and separators are unaffected by lowercasing, so the
                // lowercased remainder parses identically.
                return Some(rest.to_string());
            }
        }
    }
    None
}

/// Strip a leading or trailing 2-4 letter currency code, returning the
/// remainder. Longer alphabetic runs are not treated as an indicator.
fn strip_currency_code(text: &str) -> Option<String> {
    let trimmed = text.trim();

    let leading: String = trimmed.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    if (2..=4).contains(&leading.len()) {
        let rest = trimmed[leading.len()..].trim_start();
        if rest.chars().next().is_some_and(|c| c.is_ascii_digit() || c == '(' || c == '-') {
            return Some(rest.to_string());
        }
    }

    let trailing: String = trimmed
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if (2..=4).contains(&trailing.len()) {
        let rest = trimmed[..trimmed.len() - trailing.len()].trim_end();
        if rest.chars().last().is_some_and(|c| c.is_ascii_digit() || c == ')') {
            return Some(rest.to_string());
        }
    }

    None
}

/// Parse the numeric remainder: drop thousands separators, convert a
/// parenthesized number to a negative one, tolerate inner whitespace.
fn parse_number(text: &str) -> Option<f64> {
    let mut cleaned: String = text.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();

    let mut negative = false;
    if cleaned.starts_with('(') && cleaned.ends_with(')') && cleaned.len() > 2 {
        negative = true;
        cleaned = cleaned[1..cleaned.len() - 1].to_string();
    }

    cleaned.parse::<f64>().ok().map(|v| if negative { -v } else { v })
}
