//! Scrape targets: the things a run fetches a value for.

use serde::{Deserialize, Serialize};

/// Kind of value a target yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// A held security; scraped value is a price.
    Investment,
    /// An index or reference security; scraped value is a price level.
    Benchmark,
    /// A currency; value is its exchange rate against the base currency.
    Currency,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Investment => "investment",
            TargetKind::Benchmark => "benchmark",
            TargetKind::Currency => "currency",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "investment" => Some(TargetKind::Investment),
            "benchmark" => Some(TargetKind::Benchmark),
            "currency" => Some(TargetKind::Currency),
            _ => None,
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical thing to fetch a value for.
///
/// Created and edited by the management layer; read-only to the scraping
/// core except that a successful secondary-provider discovery writes the
/// discovered URL back so later runs go direct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeTarget {
    pub id: i64,
    pub kind: TargetKind,
    pub name: String,
    /// Manually configured page URL, if any. Always wins over generated URLs.
    pub url: Option<String>,
    /// Manually configured CSS selector, if any.
    pub selector: Option<String>,
    /// Public identifier: an ISIN, or an `EXCHANGE:TICKER` string.
    pub public_id: Option<String>,
    /// ISO currency code the scraped value is quoted in (or, for currency
    /// targets, the currency whose rate is fetched).
    pub currency: String,
    /// Most recent successfully stored value, if any.
    pub last_value: Option<f64>,
}

impl ScrapeTarget {
    pub fn new(id: i64, kind: TargetKind, name: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            url: None,
            selector: None,
            public_id: None,
            currency: currency.into(),
            last_value: None,
        }
    }
}
