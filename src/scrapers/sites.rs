//! Per-site scraping knowledge: selector patterns, wait strategies, referers
//! and pre-seeded consent cookies.
//!
//! The built-in tables cover the providers the target set actually uses;
//! all of them can be extended or overridden from the settings file.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long to wait for a navigation, and for the value element, on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Wait for the DOM to be parsed. Enough for server-rendered pages.
    #[default]
    DomParsed,
    /// Wait for the page's network activity to settle. Needed for sites that
    /// only render the value after client-side script execution.
    NetworkQuiescent,
}

impl WaitStrategy {
    pub fn navigation_timeout(&self) -> Duration {
        match self {
            WaitStrategy::DomParsed => Duration::from_secs(45),
            WaitStrategy::NetworkQuiescent => Duration::from_secs(60),
        }
    }

    pub fn selector_timeout(&self) -> Duration {
        match self {
            WaitStrategy::DomParsed => Duration::from_secs(20),
            WaitStrategy::NetworkQuiescent => Duration::from_secs(45),
        }
    }
}

/// A known-site entry: any target URL containing `url_contains` uses this
/// selector and wait strategy when no manual selector is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitePattern {
    pub url_contains: String,
    pub selector: String,
    #[serde(default)]
    pub wait: WaitStrategy,
    /// Unit assumed when the scraped text carries no indicator. The common
    /// provider format is minor-unit-only, hence the default.
    #[serde(default = "default_assume_minor")]
    pub assume_minor: bool,
}

fn default_assume_minor() -> bool {
    true
}

/// Primary provider URL templates and fixed selectors, used when a target
/// has a public identifier but no manual URL.
pub const FUND_TEARSHEET_URL: &str = "https://markets.ft.com/data/funds/tearsheet/summary?s=";
pub const EQUITY_TEARSHEET_URL: &str = "https://markets.ft.com/data/equities/tearsheet/summary?s=";
pub const TEARSHEET_SELECTOR: &str = ".mod-ui-data-list__value";

/// Secondary provider used for factsheet discovery when the primary URLs
/// fail for an ISIN target. The search results render inside a nested frame.
pub const SECONDARY_SEARCH_URL: &str =
    "https://www.morningstar.co.uk/uk/funds/SecuritySearchResults.aspx?search=";
pub const SECONDARY_RESULTS_FRAME: &str = "iframe#searchResultsFrame";
pub const SECONDARY_FACTSHEET_LINK: &str = "a[href*='factsheet']";

/// All per-site lookup tables, with defaults that can be overridden from
/// the settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteTables {
    pub patterns: Vec<SitePattern>,
    /// Referer sent with the first navigation to a host.
    pub referers: HashMap<String, String>,
    /// Used when no per-domain referer is configured.
    pub default_referer: String,
    /// Cookies pre-seeded per domain to skip consent interstitials.
    pub consent_cookies: Vec<ConsentCookie>,
    /// Hosts that only render content after client-side script execution.
    pub quiescent_domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentCookie {
    pub domain: String,
    pub name: String,
    pub value: String,
}

impl Default for SiteTables {
    fn default() -> Self {
        let patterns = vec![
            SitePattern {
                url_contains: "markets.ft.com".into(),
                selector: TEARSHEET_SELECTOR.into(),
                wait: WaitStrategy::DomParsed,
                assume_minor: true,
            },
            SitePattern {
                url_contains: "morningstar.co.uk".into(),
                selector: "#overviewQuickstatsDiv span.text".into(),
                wait: WaitStrategy::NetworkQuiescent,
                assume_minor: true,
            },
            SitePattern {
                url_contains: "hl.co.uk".into(),
                selector: "span.bid-price".into(),
                wait: WaitStrategy::DomParsed,
                assume_minor: true,
            },
            SitePattern {
                url_contains: "londonstockexchange.com".into(),
                selector: "span.price-tag".into(),
                wait: WaitStrategy::NetworkQuiescent,
                assume_minor: true,
            },
            SitePattern {
                url_contains: "finance.yahoo.com".into(),
                selector: "fin-streamer[data-field='regularMarketPrice']".into(),
                wait: WaitStrategy::NetworkQuiescent,
                assume_minor: false,
            },
            SitePattern {
                url_contains: "google.com/finance".into(),
                selector: ".YMlKec.fxKbKc".into(),
                wait: WaitStrategy::NetworkQuiescent,
                assume_minor: false,
            },
            SitePattern {
                url_contains: "investing.com".into(),
                selector: "[data-test='instrument-price-last']".into(),
                wait: WaitStrategy::NetworkQuiescent,
                assume_minor: false,
            },
        ];

        let mut referers = HashMap::new();
        referers.insert(
            "markets.ft.com".to_string(),
            "https://markets.ft.com/data".to_string(),
        );
        referers.insert(
            "www.morningstar.co.uk".to_string(),
            "https://www.morningstar.co.uk/uk/".to_string(),
        );
        referers.insert(
            "www.hl.co.uk".to_string(),
            "https://www.hl.co.uk/funds".to_string(),
        );

        let consent_cookies = vec![
            ConsentCookie {
                domain: ".ft.com".into(),
                name: "FTConsent".into(),
                value: "behaviouraladsOnsite:on,cookiesOnsite:on,cookiesUseraccept:on".into(),
            },
            ConsentCookie {
                domain: ".morningstar.co.uk".into(),
                name: "OptanonAlertBoxClosed".into(),
                value: "2024-01-01T00:00:00.000Z".into(),
            },
            ConsentCookie {
                domain: ".londonstockexchange.com".into(),
                name: "OptanonAlertBoxClosed".into(),
                value: "2024-01-01T00:00:00.000Z".into(),
            },
        ];

        let quiescent_domains = vec![
            "www.morningstar.co.uk".to_string(),
            "www.londonstockexchange.com".to_string(),
            "finance.yahoo.com".to_string(),
            "www.google.com".to_string(),
            "www.investing.com".to_string(),
        ];

        Self {
            patterns,
            referers,
            default_referer: "https://www.google.com/".to_string(),
            consent_cookies,
            quiescent_domains,
        }
    }
}

impl SiteTables {
    /// First pattern whose substring appears in the URL.
    pub fn pattern_for(&self, url: &str) -> Option<&SitePattern> {
        self.patterns.iter().find(|p| url.contains(&p.url_contains))
    }

    /// Wait strategy for a URL: the matching pattern's, else quiescent if the
    /// host is on the quiescent list, else DOM-parsed.
    pub fn wait_for(&self, url: &str) -> WaitStrategy {
        if let Some(pattern) = self.pattern_for(url) {
            return pattern.wait;
        }
        let host = super::delay::host_of(url);
        if self.quiescent_domains.iter().any(|d| *d == host) {
            WaitStrategy::NetworkQuiescent
        } else {
            WaitStrategy::DomParsed
        }
    }

    /// Referer for a host, falling back to the generic search-engine referer.
    pub fn referer_for(&self, host: &str) -> &str {
        self.referers
            .get(host)
            .map(|s| s.as_str())
            .unwrap_or(&self.default_referer)
    }

    /// Consent cookies applicable to a host (domain suffix match).
    pub fn consent_cookies_for(&self, host: &str) -> Vec<&ConsentCookie> {
        self.consent_cookies
            .iter()
            .filter(|c| {
                let bare = c.domain.trim_start_matches('.');
                host == bare || host.ends_with(&format!(".{bare}"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matches_by_substring() {
        let tables = SiteTables::default();
        let p = tables
            .pattern_for("https://markets.ft.com/data/funds/tearsheet/summary?s=X:GBP")
            .expect("ft pattern");
        assert_eq!(p.selector, TEARSHEET_SELECTOR);
        assert!(tables.pattern_for("https://example.com/quote").is_none());
    }

    #[test]
    fn wait_strategy_prefers_pattern_then_quiescent_list() {
        let tables = SiteTables::default();
        assert_eq!(
            tables.wait_for("https://markets.ft.com/data/funds/tearsheet/summary?s=X"),
            WaitStrategy::DomParsed
        );
        assert_eq!(
            tables.wait_for("https://www.morningstar.co.uk/uk/funds/snapshot.aspx?id=F0"),
            WaitStrategy::NetworkQuiescent
        );
        assert_eq!(
            tables.wait_for("https://example.com/page"),
            WaitStrategy::DomParsed
        );
    }

    #[test]
    fn referer_falls_back_to_search_engine() {
        let tables = SiteTables::default();
        assert_eq!(tables.referer_for("markets.ft.com"), "https://markets.ft.com/data");
        assert_eq!(tables.referer_for("unknown.example.org"), "https://www.google.com/");
    }

    #[test]
    fn consent_cookies_cover_at_least_two_domains() {
        let tables = SiteTables::default();
        let domains: std::collections::HashSet<_> = tables
            .consent_cookies
            .iter()
            .map(|c| c.domain.as_str())
            .collect();
        assert!(domains.len() >= 2);

        let ft = tables.consent_cookies_for("markets.ft.com");
        assert!(!ft.is_empty());
        let ms = tables.consent_cookies_for("www.morningstar.co.uk");
        assert!(!ms.is_empty());
        assert!(tables.consent_cookies_for("example.com").is_empty());
    }

    #[test]
    fn quiescent_sites_get_extended_timeouts() {
        assert!(WaitStrategy::NetworkQuiescent.navigation_timeout() >= Duration::from_secs(60));
        assert!(WaitStrategy::DomParsed.navigation_timeout() < Duration::from_secs(60));
        assert!(
            WaitStrategy::NetworkQuiescent.selector_timeout()
                > WaitStrategy::DomParsed.selector_timeout()
        );
    }
}
