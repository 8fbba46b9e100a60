//! Run-level orchestration.
//!
//! A run is strictly sequential: rates first (so a price snapshot and its
//! currency rate are contemporaneous), then prices, then benchmarks, one
//! shared browser across all of it, with the delay scheduler pacing
//! navigations. Every attempt lands in the audit trail; every failure is
//! isolated to its target.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{ScrapeAttempt, ScrapeTarget, StartedBy, TargetKind};
use crate::repository::Store;

use super::delay::{DelayProfile, DelayScheduler};
use super::error::{ErrorCode, ScrapeError};
use super::quote::TargetScraper;
use super::rates::RateFetcher;
use super::resolver::Resolver;
use super::sites::SiteTables;
use super::value::round4;
use super::ScrapeResult;

/// Which stages a run executes. Rates always run first when enabled.
#[derive(Debug, Clone, Copy)]
pub struct RunScope {
    pub rates: bool,
    pub prices: bool,
    pub benchmarks: bool,
}

impl Default for RunScope {
    fn default() -> Self {
        Self {
            rates: true,
            prices: true,
            benchmarks: true,
        }
    }
}

/// One event per completed target, in completion order, plus a terminal
/// summary. Consumed by a streaming caller; a dropped receiver cancels the
/// rest of the run.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Target {
        kind: TargetKind,
        id: i64,
        name: String,
        result: ScrapeResult,
    },
    Completed(RunSummary),
}

/// Per-kind success/failure tallies.
#[derive(Debug, Clone, Default)]
pub struct KindSummary {
    pub succeeded: u32,
    pub failed: u32,
    pub failed_ids: Vec<i64>,
    /// Failed ids worth retrying. Configuration gaps (NO_URL, NO_SELECTOR)
    /// are excluded; a retry cannot fix missing configuration.
    pub retryable_ids: Vec<i64>,
}

impl KindSummary {
    fn count(&mut self, id: i64, result: &ScrapeResult) {
        if result.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            self.failed_ids.push(id);
            let retryable = result
                .error
                .as_ref()
                .map(|e| e.code.is_retryable())
                .unwrap_or(true);
            if retryable {
                self.retryable_ids.push(id);
            }
        }
    }
}

/// Aggregated outcome of one orchestrated run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_by: StartedBy,
    pub rates: KindSummary,
    pub prices: KindSummary,
    pub benchmarks: KindSummary,
    /// Whether the rate fetch succeeded and every currency target got a rate.
    pub currency_success: bool,
    /// Set when the run aborted early (browser would not launch or
    /// relaunch). Whatever succeeded before the abort is still counted.
    pub fatal: Option<String>,
}

impl RunSummary {
    fn new(started_by: StartedBy) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_by,
            rates: KindSummary::default(),
            prices: KindSummary::default(),
            benchmarks: KindSummary::default(),
            currency_success: false,
            fatal: None,
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.prices.failed_ids.is_empty()
            || !self.benchmarks.failed_ids.is_empty()
            || !self.currency_success
    }

    /// The retry set for `retry_failed`: retryable failures only.
    pub fn failed_items(&self) -> FailedItems {
        FailedItems {
            prices: self.prices.retryable_ids.clone(),
            benchmarks: self.benchmarks.retryable_ids.clone(),
            currency: !self.currency_success,
        }
    }

    /// Whether a retry pass could improve anything.
    pub fn has_retryable_failures(&self) -> bool {
        !self.prices.retryable_ids.is_empty()
            || !self.benchmarks.retryable_ids.is_empty()
            || !self.currency_success
    }
}

/// IDs to re-run after a batch with failures.
#[derive(Debug, Clone, Default)]
pub struct FailedItems {
    pub prices: Vec<i64>,
    pub benchmarks: Vec<i64>,
    /// Currency retry re-runs the whole rate fetch; one request covers all
    /// currencies, so there is nothing finer-grained to retry.
    pub currency: bool,
}

/// A scraped target's result plus, when the browser would not come back,
/// the fatal condition that aborts the rest of the run.
struct TargetOutcome {
    result: ScrapeResult,
    fatal: Option<String>,
}

impl From<ScrapeResult> for TargetOutcome {
    fn from(result: ScrapeResult) -> Self {
        Self {
            result,
            fatal: None,
        }
    }
}

/// Sequences a full scrape or a targeted retry over one shared browser.
pub struct Orchestrator<S: TargetScraper, R: RateFetcher> {
    store: Arc<dyn Store>,
    scraper: S,
    rates: R,
    sites: SiteTables,
    base_currency: String,
    started_by: StartedBy,
    delays: DelayScheduler,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
    cancelled: bool,
    /// One timestamp per run, shared by every value written in it.
    run_date: NaiveDate,
    run_time: NaiveTime,
}

impl<S: TargetScraper, R: RateFetcher> Orchestrator<S, R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        scraper: S,
        rates: R,
        sites: SiteTables,
        base_currency: impl Into<String>,
        profile: DelayProfile,
        started_by: StartedBy,
    ) -> Self {
        let now = Utc::now();
        Self {
            store,
            scraper,
            rates,
            sites,
            base_currency: base_currency.into(),
            started_by,
            delays: DelayScheduler::new(profile),
            events: None,
            cancelled: false,
            run_date: now.date_naive(),
            run_time: now.time(),
        }
    }

    /// Stream run events to a channel. One `Target` event per completed
    /// target plus a terminal `Completed`; dropping the receiver cancels
    /// the remainder of the run (the browser is still closed).
    pub fn with_events(mut self, events: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Run a full scrape: rates, then prices, then benchmarks.
    pub async fn run_full(&mut self, scope: RunScope) -> RunSummary {
        self.start_run();
        let mut summary = RunSummary::new(self.started_by);
        info!("Starting scrape run {}", summary.run_id);

        if scope.rates {
            self.fetch_rates(&mut summary, 1).await;
        }

        let batch = self.scrape_batches(&scope, None, &mut summary, 1).await;

        // Cleanup path: runs however the batch loop exited.
        self.scraper.close().await;

        if let Err(fatal) = batch {
            error!("Run aborted: {}", fatal);
            summary.fatal = Some(fatal.to_string());
        }

        self.emit(RunEvent::Completed(summary.clone()));
        summary
    }

    /// Re-run only the given failed items. IDs are re-filtered against the
    /// live scrapeable set; anything no longer scrapeable is silently
    /// skipped. `attempt_number` is the caller's retry counter (2-5).
    pub async fn retry_failed(&mut self, failed: &FailedItems, attempt_number: u8) -> RunSummary {
        self.start_run();
        let mut summary = RunSummary::new(self.started_by);
        info!(
            "Retry run {} (attempt {}): {} prices, {} benchmarks, currency={}",
            summary.run_id,
            attempt_number,
            failed.prices.len(),
            failed.benchmarks.len(),
            failed.currency
        );

        if failed.currency {
            self.fetch_rates(&mut summary, attempt_number).await;
        } else {
            summary.currency_success = true;
        }

        let scope = RunScope {
            rates: false,
            prices: !failed.prices.is_empty(),
            benchmarks: !failed.benchmarks.is_empty(),
        };
        let batch = self
            .scrape_batches(&scope, Some(failed), &mut summary, attempt_number)
            .await;

        self.scraper.close().await;

        if let Err(fatal) = batch {
            error!("Retry run aborted: {}", fatal);
            summary.fatal = Some(fatal.to_string());
        }

        self.emit(RunEvent::Completed(summary.clone()));
        summary
    }

    /// Scrape a single target on demand, with the same persistence and
    /// audit trail as a batch run. Currency targets go through the rate
    /// fetch (which covers all currencies in one request anyway).
    pub async fn scrape_one(&mut self, kind: TargetKind, id: i64) -> anyhow::Result<ScrapeResult> {
        self.start_run();
        let target = self
            .store
            .get_target(kind, id)?
            .ok_or_else(|| anyhow::anyhow!("no {} target with id {}", kind, id))?;

        if kind == TargetKind::Currency {
            let mut summary = RunSummary::new(self.started_by);
            self.fetch_rates(&mut summary, 1).await;
            return Ok(if summary.rates.failed_ids.contains(&id) {
                ScrapeResult::failure(
                    ScrapeError::new(
                        ErrorCode::NetworkError,
                        format!("rate fetch did not produce a rate for {}", target.currency),
                    ),
                    false,
                )
            } else {
                let value = self
                    .store
                    .get_target(kind, id)?
                    .and_then(|t| t.last_value)
                    .unwrap_or_default();
                ScrapeResult::rate(value)
            });
        }

        let launch = self.scraper.launch().await;
        let result = match launch {
            Ok(()) => self.scrape_target(&target, 1).await.result,
            Err(e) => {
                let result = ScrapeResult::failure(e, false);
                self.record_attempt(&target, 1, &result);
                result
            }
        };
        self.scraper.close().await;
        Ok(result)
    }

    /// Stamp the shared run timestamp.
    fn start_run(&mut self) {
        let now = Utc::now();
        self.run_date = now.date_naive();
        self.run_time = now.time();
        self.cancelled = false;
        self.delays.reset();
    }

    /// Price/benchmark batches over the shared browser. Returns Err only on
    /// fatal conditions (browser will not launch or relaunch, storage gone);
    /// per-target failures are absorbed into the summary.
    async fn scrape_batches(
        &mut self,
        scope: &RunScope,
        only_ids: Option<&FailedItems>,
        summary: &mut RunSummary,
        attempt_number: u8,
    ) -> anyhow::Result<()> {
        let mut batches: Vec<(TargetKind, Vec<ScrapeTarget>)> = Vec::new();

        if scope.prices {
            let ids = only_ids.map(|f| f.prices.as_slice());
            batches.push((
                TargetKind::Investment,
                self.scrapeable_targets(TargetKind::Investment, ids)?,
            ));
        }
        if scope.benchmarks {
            let ids = only_ids.map(|f| f.benchmarks.as_slice());
            batches.push((
                TargetKind::Benchmark,
                self.scrapeable_targets(TargetKind::Benchmark, ids)?,
            ));
        }

        if batches.iter().all(|(_, targets)| targets.is_empty()) {
            return Ok(());
        }

        self.scraper
            .launch()
            .await
            .map_err(|e| anyhow::anyhow!("browser launch failed: {}", e.diagnostic()))?;

        for (kind, targets) in batches {
            for target in targets {
                if self.cancelled {
                    info!("Run cancelled by caller, stopping before {}", target.name);
                    return Ok(());
                }

                let outcome = self.scrape_target(&target, attempt_number).await;
                let slot = match kind {
                    TargetKind::Investment => &mut summary.prices,
                    _ => &mut summary.benchmarks,
                };
                slot.count(target.id, &outcome.result);

                if let Some(fatal) = outcome.fatal {
                    // Browser would not come back; remaining targets are
                    // unreachable this run.
                    return Err(anyhow::anyhow!(fatal));
                }
            }
        }

        Ok(())
    }

    /// The live scrapeable set for a kind, optionally narrowed to an id list.
    fn scrapeable_targets(
        &self,
        kind: TargetKind,
        only_ids: Option<&[i64]>,
    ) -> anyhow::Result<Vec<ScrapeTarget>> {
        let resolver = Resolver::new(&self.sites);
        let mut targets = self.store.list_scrapeable(kind)?;
        targets.retain(|t| resolver.is_scrapeable(t));
        if let Some(ids) = only_ids {
            targets.retain(|t| ids.contains(&t.id));
        }
        Ok(targets)
    }

    /// One target: delay, scrape (with a single relaunch-and-retry if the
    /// browser died under it), persist, record, emit. Never retries the
    /// scrape itself; that is the caller's concern.
    async fn scrape_target(&mut self, target: &ScrapeTarget, attempt_number: u8) -> TargetOutcome {
        let resolver = Resolver::new(&self.sites);
        let resolved = match resolver.resolve(target) {
            Some(resolved) => resolved,
            None => {
                let result = ScrapeResult::failure(
                    ScrapeError::new(
                        ErrorCode::NoUrl,
                        format!("no URL resolvable for {:?}", target.name),
                    ),
                    false,
                );
                self.record_attempt(target, attempt_number, &result);
                self.emit_target(target, &result);
                return TargetOutcome::from(result);
            }
        };

        debug!(
            "Scraping {} via {} (url: {}, selector: {})",
            target.name,
            resolved.url_source.as_str(),
            resolved.url,
            resolved.selector.as_deref().unwrap_or("<none>")
        );

        let pause = self.delays.next_delay(&resolved.url);
        if !pause.is_zero() {
            debug!("Politeness delay: {:?}", pause);
            tokio::time::sleep(pause).await;
        }

        let (mut result, mut write_back) = self.scraper.scrape(target, &resolved).await;
        let mut fatal = None;

        // A mid-target browser death surfaces as a failed scrape on a dead
        // browser. Relaunch once, reset the delay sequence, and give the
        // same target its retry within this run.
        if !result.success && !self.scraper.is_alive().await {
            warn!("Browser died while scraping {}, relaunching", target.name);
            match self.scraper.relaunch().await {
                Ok(()) => {
                    self.delays.reset();
                    (result, write_back) = self.scraper.scrape(target, &resolved).await;
                }
                Err(e) => {
                    let message = format!("browser relaunch failed: {}", e.message);
                    result = ScrapeResult::failure(
                        ScrapeError::new(ErrorCode::BrowserError, message.clone()),
                        result.fallback_used,
                    );
                    fatal = Some(message);
                }
            }
        }

        if let Some(command) = write_back.take() {
            info!(
                "Persisting discovered URL for {}: {}",
                target.name, command.url
            );
            if let Err(e) = self.store.write_back_discovered_url(
                command.kind,
                command.target_id,
                &command.url,
                command.selector.as_deref(),
            ) {
                warn!("Discovered-URL write-back failed: {}", e);
            }
        }

        if result.success {
            if let Some(value) = result.normalized_value {
                if let Err(e) =
                    self.store
                        .upsert_observed_value(target.id, self.run_date, self.run_time, value)
                {
                    error!("Failed to store value for {}: {}", target.name, e);
                }
            }
        }

        self.record_attempt(target, attempt_number, &result);
        self.emit_target(target, &result);
        TargetOutcome { result, fatal }
    }

    /// Fetch all currency rates in one request and store each one.
    async fn fetch_rates(&mut self, summary: &mut RunSummary, attempt_number: u8) {
        let targets = match self.store.list_scrapeable(TargetKind::Currency) {
            Ok(targets) => targets,
            Err(e) => {
                error!("Could not list currency targets: {}", e);
                summary.currency_success = false;
                return;
            }
        };

        let symbols: Vec<String> = targets.iter().map(|t| t.currency.clone()).collect();

        match self.rates.fetch(&self.base_currency, &symbols).await {
            Ok(rates) => {
                let mut all_found = true;
                for target in &targets {
                    let result = match rates.get(&target.currency) {
                        Some(rate) => {
                            let rate = round4(*rate);
                            if let Err(e) = self.store.upsert_observed_value(
                                target.id,
                                self.run_date,
                                self.run_time,
                                rate,
                            ) {
                                error!("Failed to store rate for {}: {}", target.currency, e);
                            }
                            ScrapeResult::rate(rate)
                        }
                        None => {
                            all_found = false;
                            ScrapeResult::failure(
                                ScrapeError::new(
                                    ErrorCode::ParseError,
                                    format!("no rate for {} in response", target.currency),
                                ),
                                false,
                            )
                        }
                    };
                    summary.rates.count(target.id, &result);
                    self.record_attempt(target, attempt_number, &result);
                    self.emit_target(target, &result);
                }
                summary.currency_success = all_found;
            }
            Err(e) => {
                warn!("Rate fetch failed: {}", e);
                for target in &targets {
                    let result = ScrapeResult::failure(e.clone(), false);
                    summary.rates.count(target.id, &result);
                    self.record_attempt(target, attempt_number, &result);
                    self.emit_target(target, &result);
                }
                summary.currency_success = false;
            }
        }
    }

    /// Best-effort attempt recording: a storage failure here must never
    /// fail the scrape that produced it.
    fn record_attempt(&self, target: &ScrapeTarget, attempt_number: u8, result: &ScrapeResult) {
        let attempt = ScrapeAttempt {
            target_kind: target.kind,
            target_id: target.id,
            attempted_at: Utc::now(),
            started_by: self.started_by,
            attempt_number,
            success: result.success,
            error_code: result.error.as_ref().map(|e| e.code.as_str().to_string()),
            error_message: result.error.as_ref().map(|e| e.diagnostic()),
        };
        if let Err(e) = self.store.record_attempt(&attempt) {
            warn!(
                "Could not record attempt for {} #{}: {}",
                target.kind, target.id, e
            );
        }
    }

    fn emit_target(&mut self, target: &ScrapeTarget, result: &ScrapeResult) {
        self.emit(RunEvent::Target {
            kind: target.kind,
            id: target.id,
            name: target.name.clone(),
            result: result.clone(),
        });
    }

    fn emit(&mut self, event: RunEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                // Receiver gone: the caller stopped listening. Finish the
                // current target, then stop.
                self.events = None;
                self.cancelled = true;
            }
        }
    }
}
