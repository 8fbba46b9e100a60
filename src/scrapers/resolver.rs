//! Computes the effective URL, selector and wait strategy for a target.
//!
//! Manual configuration always wins over anything generated; generated URLs
//! come from a target's public identifier (ISIN or `EXCHANGE:TICKER`).
//! Resolution is recomputed every run, so edits to a target take effect
//! immediately.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{ScrapeTarget, TargetKind};

use super::sites::{
    SiteTables, WaitStrategy, EQUITY_TEARSHEET_URL, FUND_TEARSHEET_URL,
    SECONDARY_FACTSHEET_LINK, SECONDARY_RESULTS_FRAME, SECONDARY_SEARCH_URL, TEARSHEET_SELECTOR,
};

static ISIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2}[A-Z0-9]{9}[0-9]$").unwrap());

/// Where a resolved URL or selector came from. Exposed to operators so a
/// bad value can be traced to the record, the pattern table or the
/// identifier-based generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Manual,
    PublicId,
    SiteConfig,
}

impl ConfigSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSource::Manual => "manual",
            ConfigSource::PublicId => "public_id",
            ConfigSource::SiteConfig => "site_config",
        }
    }
}

/// The effective scrape configuration for one target, computed at scrape
/// time and never persisted.
#[derive(Debug, Clone)]
pub struct ResolvedScrapeConfig {
    pub url: String,
    pub selector: Option<String>,
    pub wait: WaitStrategy,
    /// Unit assumed when scraped text has no indicator (per-site setting).
    pub assume_minor: bool,
    pub url_source: ConfigSource,
    pub selector_source: Option<ConfigSource>,
}

/// Deferred persistence of a URL discovered through the secondary provider.
/// Returned alongside the scrape result; the orchestrator decides when to
/// apply it, which keeps resolution free of storage side effects.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBackCommand {
    pub kind: TargetKind,
    pub target_id: i64,
    pub url: String,
    /// Left unset so later runs resolve the selector from the pattern table.
    pub selector: Option<String>,
}

/// Plan for the secondary-provider discovery fallback (ISIN targets only).
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryPlan {
    pub search_url: String,
    pub frame_selector: String,
    pub link_selector: String,
}

/// Resolves targets against the site tables.
pub struct Resolver<'a> {
    sites: &'a SiteTables,
}

impl<'a> Resolver<'a> {
    pub fn new(sites: &'a SiteTables) -> Self {
        Self { sites }
    }

    /// Compute the effective config. Returns None when no URL is resolvable;
    /// such targets are excluded from batch runs.
    pub fn resolve(&self, target: &ScrapeTarget) -> Option<ResolvedScrapeConfig> {
        if let Some(url) = &target.url {
            let pattern = self.sites.pattern_for(url);
            let (selector, selector_source) = match (&target.selector, pattern) {
                (Some(sel), _) => (Some(sel.clone()), Some(ConfigSource::Manual)),
                (None, Some(p)) => (Some(p.selector.clone()), Some(ConfigSource::SiteConfig)),
                (None, None) => (None, None),
            };
            return Some(ResolvedScrapeConfig {
                url: url.clone(),
                selector,
                wait: self.sites.wait_for(url),
                assume_minor: pattern.map(|p| p.assume_minor).unwrap_or(true),
                url_source: ConfigSource::Manual,
                selector_source,
            });
        }

        let public_id = target.public_id.as_deref()?;
        let url = generated_url(public_id, &target.currency)?;
        let pattern = self.sites.pattern_for(&url);
        Some(ResolvedScrapeConfig {
            wait: self.sites.wait_for(&url),
            assume_minor: pattern.map(|p| p.assume_minor).unwrap_or(true),
            url,
            selector: Some(TEARSHEET_SELECTOR.to_string()),
            url_source: ConfigSource::PublicId,
            selector_source: Some(ConfigSource::PublicId),
        })
    }

    /// Whether a target would be included in a batch run.
    pub fn is_scrapeable(&self, target: &ScrapeTarget) -> bool {
        // Currency targets are fetched through the rates endpoint and need
        // no page URL.
        target.kind == TargetKind::Currency || self.resolve(target).is_some()
    }

    /// The alternate-currency URL to try when the primary fails: the same
    /// provider sometimes lists a fund under GBX instead of GBP. Only
    /// applies to auto-generated fund URLs; manual and ticker-based targets
    /// get no alternate.
    pub fn alternate_currency_url(&self, resolved: &ResolvedScrapeConfig) -> Option<String> {
        if resolved.url_source != ConfigSource::PublicId {
            return None;
        }
        if !resolved.url.starts_with(FUND_TEARSHEET_URL) {
            return None;
        }
        swap_minor_unit_suffix(&resolved.url)
    }

    /// Discovery plan for the secondary provider, available only when the
    /// target carries an ISIN.
    pub fn discovery_plan(&self, target: &ScrapeTarget) -> Option<DiscoveryPlan> {
        let id = target.public_id.as_deref()?;
        if !is_isin(id) {
            return None;
        }
        Some(DiscoveryPlan {
            search_url: format!("{}{}", SECONDARY_SEARCH_URL, id),
            frame_selector: SECONDARY_RESULTS_FRAME.to_string(),
            link_selector: SECONDARY_FACTSHEET_LINK.to_string(),
        })
    }

    /// Selector to use on a discovered factsheet page.
    pub fn selector_for_discovered(&self, url: &str) -> Option<String> {
        self.sites.pattern_for(url).map(|p| p.selector.clone())
    }
}

/// Swap the GBP/GBX currency suffix on a tearsheet URL. Applying the swap
/// twice returns the original URL; any other suffix is left alone (None).
pub fn swap_minor_unit_suffix(url: &str) -> Option<String> {
    if let Some(base) = url.strip_suffix(":GBP") {
        Some(format!("{base}:GBX"))
    } else if let Some(base) = url.strip_suffix(":GBX") {
        Some(format!("{base}:GBP"))
    } else {
        None
    }
}

pub fn is_isin(id: &str) -> bool {
    ISIN_RE.is_match(id)
}

/// Split an `EXCHANGE:TICKER` public identifier.
fn parse_exchange_ticker(id: &str) -> Option<(&str, &str)> {
    let (exchange, ticker) = id.split_once(':')?;
    if exchange.is_empty() || ticker.is_empty() {
        return None;
    }
    Some((exchange, ticker))
}

/// Generate the provider URL for a public identifier. ISINs get a fund
/// tearsheet; `EXCHANGE:TICKER` identifiers get an equity tearsheet with the
/// order reversed to match the provider's `TICKER:EXCHANGE` convention.
pub fn generated_url(public_id: &str, currency: &str) -> Option<String> {
    if is_isin(public_id) {
        return Some(format!("{FUND_TEARSHEET_URL}{public_id}:{currency}"));
    }
    let (exchange, ticker) = parse_exchange_ticker(public_id)?;
    Some(format!("{EQUITY_TEARSHEET_URL}{ticker}:{exchange}"))
}
