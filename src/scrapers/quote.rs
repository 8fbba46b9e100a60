//! Single-target scraping: one page, one value, with the URL fallback chain.
//!
//! The chain for an auto-generated fund URL is primary → alternate currency
//! (GBP↔GBX) → secondary-provider factsheet discovery. Manual targets get
//! no fallback; their configuration is taken at face value.

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::models::{ScrapeTarget, TargetKind};

use super::browser::{BrowserEngineConfig, BrowserSession};
use super::error::{ErrorCode, ScrapeError};
use super::extract;
use super::resolver::{
    ConfigSource, DiscoveryPlan, ResolvedScrapeConfig, Resolver, WriteBackCommand,
};
use super::sites::SiteTables;
use super::value::{normalise_to_minor_unit, parse_level, parse_price, round4};
use super::ScrapeResult;

/// Seam between the orchestrator and the browser, so run sequencing can be
/// tested without Chrome.
#[async_trait]
pub trait TargetScraper: Send {
    /// Launch (or connect) the underlying browser.
    async fn launch(&mut self) -> Result<(), ScrapeError>;

    /// Whether the browser still answers.
    async fn is_alive(&self) -> bool;

    /// Replace a dead browser with a fresh one.
    async fn relaunch(&mut self) -> Result<(), ScrapeError>;

    /// Scrape one target with its resolved config, running the fallback
    /// chain. Never retries internally; retry is a caller-level concern.
    async fn scrape(
        &mut self,
        target: &ScrapeTarget,
        resolved: &ResolvedScrapeConfig,
    ) -> (ScrapeResult, Option<WriteBackCommand>);

    /// Close the browser. Must be safe to call on every exit path.
    async fn close(&mut self);
}

/// The production scraper: a stealth browser session plus site tables.
pub struct BrowserTargetScraper {
    session: BrowserSession,
    sites: SiteTables,
}

impl BrowserTargetScraper {
    pub fn new(config: BrowserEngineConfig, sites: SiteTables) -> Self {
        Self {
            session: BrowserSession::new(config),
            sites,
        }
    }

    /// Navigate to one URL and pull the raw selector text out of it.
    async fn fetch_raw(
        &self,
        url: &str,
        selector: &str,
        resolved: &ResolvedScrapeConfig,
    ) -> Result<String, ScrapeError> {
        let page = self.session.new_page(&self.sites, url).await?;

        let result = async {
            self.session
                .navigate(&self.sites, &page, url, resolved.wait, None)
                .await?;
            extract::extract_text(&page, selector, resolved.wait.selector_timeout()).await
        }
        .await;

        // Close the page to prevent tab accumulation across a long run.
        let _ = page.close().await;

        result
    }

    /// Parse and normalize raw text according to the target kind.
    fn finish(
        &self,
        target: &ScrapeTarget,
        resolved: &ResolvedScrapeConfig,
        raw: String,
        fallback_used: bool,
    ) -> Result<ScrapeResult, ScrapeError> {
        match target.kind {
            TargetKind::Benchmark => {
                let parsed = parse_level(&raw);
                let value = parsed.value.ok_or_else(|| {
                    ScrapeError::new(
                        ErrorCode::ParseError,
                        format!("could not parse level from {:?}", raw),
                    )
                })?;
                Ok(ScrapeResult {
                    raw_value: Some(raw),
                    parsed_value: Some(value),
                    unit_is_minor: None,
                    normalized_value: Some(round4(value)),
                    success: true,
                    error: None,
                    fallback_used,
                })
            }
            _ => {
                let parsed = parse_price(&raw, resolved.assume_minor);
                let value = parsed.value.ok_or_else(|| {
                    ScrapeError::new(
                        ErrorCode::ParseError,
                        format!("could not parse price from {:?}", raw),
                    )
                })?;
                Ok(ScrapeResult {
                    raw_value: Some(raw),
                    parsed_value: Some(value),
                    unit_is_minor: Some(parsed.unit_is_minor),
                    normalized_value: Some(normalise_to_minor_unit(value, parsed.unit_is_minor)),
                    success: true,
                    error: None,
                    fallback_used,
                })
            }
        }
    }

    /// One complete attempt against one URL: fetch, parse, normalize.
    async fn attempt(
        &self,
        target: &ScrapeTarget,
        resolved: &ResolvedScrapeConfig,
        url: &str,
        selector: &str,
        fallback_used: bool,
    ) -> Result<ScrapeResult, ScrapeError> {
        let raw = self.fetch_raw(url, selector, resolved).await?;
        self.finish(target, resolved, raw, fallback_used)
    }

    /// Secondary-provider discovery: search by ISIN, find the factsheet link
    /// inside the nested results frame, then extract from the discovered
    /// page. Returns the raw text and the URL to write back.
    async fn discover(
        &self,
        target: &ScrapeTarget,
        plan: &DiscoveryPlan,
        resolver: &Resolver<'_>,
    ) -> Result<(ScrapeResult, String), ScrapeError> {
        debug!("Secondary-provider search for {:?}", target.public_id);

        let page = self.session.new_page(&self.sites, &plan.search_url).await?;
        let discovery = async {
            self.session
                .navigate(
                    &self.sites,
                    &page,
                    &plan.search_url,
                    super::sites::WaitStrategy::NetworkQuiescent,
                    None,
                )
                .await?;

            // The results render inside a nested browsing context; we read its
            // src and walk into the document directly.
            let frame = extract::wait_for_element(
                &page,
                &plan.frame_selector,
                super::sites::WaitStrategy::NetworkQuiescent.selector_timeout(),
            )
            .await?;

            let frame_src = frame
                .attribute("src")
                .await
                .map_err(|e| {
                    ScrapeError::new(ErrorCode::BrowserError, format!("frame src: {e}"))
                })?
                .ok_or_else(|| {
                    ScrapeError::new(ErrorCode::SelectorNotFound, "results frame has no src")
                })?;

            let frame_url = absolutize(&plan.search_url, &frame_src)?;

            self.session
                .navigate(
                    &self.sites,
                    &page,
                    &frame_url,
                    super::sites::WaitStrategy::DomParsed,
                    None,
                )
                .await?;

            let body = page.content().await.map_err(|e| {
                ScrapeError::new(ErrorCode::BrowserError, format!("frame content: {e}"))
            })?;

            let link = first_link(&body, &plan.link_selector).ok_or_else(|| {
                ScrapeError::new(
                    ErrorCode::SelectorNotFound,
                    format!("no {:?} link in search results", plan.link_selector),
                )
            })?;

            absolutize(&frame_url, &link)
        }
        .await;

        let _ = page.close().await;
        let discovered_url = discovery?;

        info!("Discovered factsheet URL {}", discovered_url);

        let selector = resolver
            .selector_for_discovered(&discovered_url)
            .ok_or_else(|| {
                ScrapeError::new(
                    ErrorCode::NoSelector,
                    format!("no site pattern for discovered URL {discovered_url}"),
                )
            })?;

        // The discovered page belongs to the secondary provider, so its wait
        // strategy and unit default come from that provider's pattern, not
        // the original target's.
        let discovered_config = ResolvedScrapeConfig {
            url: discovered_url.clone(),
            selector: Some(selector.clone()),
            wait: self.sites.wait_for(&discovered_url),
            assume_minor: self
                .sites
                .pattern_for(&discovered_url)
                .map(|p| p.assume_minor)
                .unwrap_or(true),
            url_source: ConfigSource::SiteConfig,
            selector_source: Some(ConfigSource::SiteConfig),
        };

        let result = self
            .attempt(target, &discovered_config, &discovered_url, &selector, true)
            .await?;
        Ok((result, discovered_url))
    }
}

#[async_trait]
impl TargetScraper for BrowserTargetScraper {
    async fn launch(&mut self) -> Result<(), ScrapeError> {
        self.session.launch().await
    }

    async fn is_alive(&self) -> bool {
        self.session.is_alive().await
    }

    async fn relaunch(&mut self) -> Result<(), ScrapeError> {
        self.session.relaunch().await
    }

    async fn scrape(
        &mut self,
        target: &ScrapeTarget,
        resolved: &ResolvedScrapeConfig,
    ) -> (ScrapeResult, Option<WriteBackCommand>) {
        let resolver = Resolver::new(&self.sites);

        let Some(selector) = resolved.selector.clone() else {
            let err = ScrapeError::new(
                ErrorCode::NoSelector,
                format!("no selector resolvable for {}", resolved.url),
            );
            return (ScrapeResult::failure(err, false), None);
        };

        let mut primary = match self
            .attempt(target, resolved, &resolved.url, &selector, false)
            .await
        {
            Ok(result) => return (result, None),
            Err(e) => e,
        };
        let mut fallback_tried = false;

        // The provider sometimes lists a fund under the minor unit; retry
        // with the currency suffix swapped before anything more expensive.
        if let Some(alternate) = resolver.alternate_currency_url(resolved) {
            fallback_tried = true;
            debug!("Trying alternate currency URL {}", alternate);
            match self
                .attempt(target, resolved, &alternate, &selector, true)
                .await
            {
                Ok(result) => return (result, None),
                Err(e) => {
                    primary = primary.with_fallback_failure("alternate currency", &e);
                }
            }
        }

        if let Some(plan) = resolver.discovery_plan(target) {
            fallback_tried = true;
            match self.discover(target, &plan, &resolver).await {
                Ok((result, discovered_url)) => {
                    let write_back = WriteBackCommand {
                        kind: target.kind,
                        target_id: target.id,
                        url: discovered_url,
                        selector: None,
                    };
                    return (result, Some(write_back));
                }
                Err(e) => {
                    primary = primary.with_fallback_failure("secondary provider", &e);
                }
            }
        }

        (ScrapeResult::failure(primary, fallback_tried), None)
    }

    async fn close(&mut self) {
        self.session.close().await;
    }
}

/// Resolve a possibly relative href against the page it was found on.
fn absolutize(base: &str, href: &str) -> Result<String, ScrapeError> {
    let base = Url::parse(base).map_err(|e| {
        ScrapeError::new(ErrorCode::BrowserError, format!("bad base URL {base:?}: {e}"))
    })?;
    base.join(href)
        .map(|u| u.to_string())
        .map_err(|e| ScrapeError::new(ErrorCode::BrowserError, format!("bad href {href:?}: {e}")))
}

/// First matching link href in an HTML document.
fn first_link(body: &str, selector: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .map(|href| href.to_string())
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_link_extracts_the_first_matching_href() {
        let body = r#"
            <html><body>
                <a href="/about">About</a>
                <a href="/funds/factsheet/GB00B4PQW151">View factsheet</a>
                <a href="/funds/factsheet/OTHER">View factsheet</a>
            </body></html>
        "#;
        assert_eq!(
            first_link(body, "a[href*='factsheet']"),
            Some("/funds/factsheet/GB00B4PQW151".to_string())
        );
        assert_eq!(first_link(body, "a[href*='missing']"), None);
    }

    #[test]
    fn absolutize_joins_relative_hrefs() {
        let url = absolutize(
            "https://www.morningstar.co.uk/uk/funds/search",
            "/uk/funds/snapshot.aspx?id=F000",
        )
        .unwrap();
        assert_eq!(
            url,
            "https://www.morningstar.co.uk/uk/funds/snapshot.aspx?id=F000"
        );

        let absolute = absolutize(
            "https://www.morningstar.co.uk/search",
            "https://other.example.com/factsheet",
        )
        .unwrap();
        assert_eq!(absolute, "https://other.example.com/factsheet");
    }
}
