//! Run orchestration behavior against stubbed browser and rate fetchers:
//! sequencing, browser-death recovery, retries, cancellation and summaries.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use quotefetch::models::{ScrapeTarget, StartedBy, TargetKind};
use quotefetch::repository::{MemoryStore, Store};
use quotefetch::scrapers::resolver::ResolvedScrapeConfig;
use quotefetch::scrapers::{
    DelayProfile, ErrorCode, FailedItems, Orchestrator, RateFetcher, RunEvent, RunScope,
    ScrapeError, ScrapeResult, SiteTables, TargetScraper, WriteBackCommand,
};

/// One scripted response for one scrape call.
#[derive(Clone)]
enum Step {
    Succeed(f64),
    SucceedWithWriteBack(f64, &'static str),
    Fail(ErrorCode),
    /// Fail and mark the browser dead, as a mid-target crash would.
    Die,
}

#[derive(Clone, Default)]
struct StubState {
    alive: Arc<AtomicBool>,
    launches: Arc<AtomicUsize>,
    relaunches: Arc<AtomicUsize>,
    scrapes: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

struct StubScraper {
    state: StubState,
    script: Mutex<HashMap<i64, VecDeque<Step>>>,
    fail_launch: bool,
    fail_relaunch: bool,
}

impl StubScraper {
    fn new() -> Self {
        Self {
            state: StubState::default(),
            script: Mutex::new(HashMap::new()),
            fail_launch: false,
            fail_relaunch: false,
        }
    }

    fn state(&self) -> StubState {
        self.state.clone()
    }

    fn script(mut self, target_id: i64, steps: Vec<Step>) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(target_id, steps.into());
        self
    }

    fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    fn failing_relaunch(mut self) -> Self {
        self.fail_relaunch = true;
        self
    }

    fn success_result(value: f64) -> ScrapeResult {
        ScrapeResult {
            raw_value: Some(format!("{value}p")),
            parsed_value: Some(value),
            unit_is_minor: Some(true),
            normalized_value: Some(value),
            success: true,
            error: None,
            fallback_used: false,
        }
    }
}

#[async_trait]
impl TargetScraper for StubScraper {
    async fn launch(&mut self) -> Result<(), ScrapeError> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch {
            return Err(ScrapeError::new(
                ErrorCode::BrowserError,
                "engine would not start",
            ));
        }
        self.state.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.state.alive.load(Ordering::SeqCst)
    }

    async fn relaunch(&mut self) -> Result<(), ScrapeError> {
        self.state.relaunches.fetch_add(1, Ordering::SeqCst);
        if self.fail_relaunch {
            return Err(ScrapeError::new(
                ErrorCode::BrowserError,
                "engine would not restart",
            ));
        }
        self.state.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn scrape(
        &mut self,
        target: &ScrapeTarget,
        _resolved: &ResolvedScrapeConfig,
    ) -> (ScrapeResult, Option<WriteBackCommand>) {
        self.state.scrapes.fetch_add(1, Ordering::SeqCst);

        let step = self
            .script
            .lock()
            .unwrap()
            .get_mut(&target.id)
            .and_then(|steps| steps.pop_front())
            .unwrap_or(Step::Succeed(100.0));

        match step {
            Step::Succeed(value) => (Self::success_result(value), None),
            Step::SucceedWithWriteBack(value, url) => (
                Self::success_result(value),
                Some(WriteBackCommand {
                    kind: target.kind,
                    target_id: target.id,
                    url: url.to_string(),
                    selector: None,
                }),
            ),
            Step::Fail(code) => (
                ScrapeResult::failure(ScrapeError::new(code, "scripted failure"), false),
                None,
            ),
            Step::Die => {
                self.state.alive.store(false, Ordering::SeqCst);
                (
                    ScrapeResult::failure(
                        ScrapeError::new(ErrorCode::BrowserError, "websocket closed"),
                        false,
                    ),
                    None,
                )
            }
        }
    }

    async fn close(&mut self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

struct StubRates {
    rates: HashMap<String, f64>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl StubRates {
    fn with(rates: &[(&str, f64)]) -> Self {
        Self {
            rates: rates.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn failing() -> Self {
        Self {
            rates: HashMap::new(),
            fail: true,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl RateFetcher for StubRates {
    async fn fetch(
        &self,
        _base: &str,
        symbols: &[String],
    ) -> Result<HashMap<String, f64>, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ScrapeError::new(ErrorCode::NetworkError, "rates down"));
        }
        Ok(symbols
            .iter()
            .filter_map(|s| self.rates.get(s).map(|v| (s.clone(), *v)))
            .collect())
    }
}

fn investment(store: &MemoryStore, name: &str, isin: &str) -> i64 {
    let mut t = ScrapeTarget::new(0, TargetKind::Investment, name, "GBP");
    t.public_id = Some(isin.to_string());
    store.add_target(t)
}

fn benchmark(store: &MemoryStore, name: &str) -> i64 {
    let mut t = ScrapeTarget::new(0, TargetKind::Benchmark, name, "GBP");
    t.url = Some("https://example.com/index".to_string());
    t.selector = Some(".level".to_string());
    store.add_target(t)
}

fn currency(store: &MemoryStore, code: &str) -> i64 {
    store.add_target(ScrapeTarget::new(0, TargetKind::Currency, code, code))
}

fn orchestrator(
    store: Arc<MemoryStore>,
    scraper: StubScraper,
    rates: StubRates,
) -> Orchestrator<StubScraper, StubRates> {
    Orchestrator::new(
        store,
        scraper,
        rates,
        SiteTables::default(),
        "GBP",
        DelayProfile {
            // Zero delays keep the tests fast; range draws still happen.
            same_domain: (0, 0),
            different_domain: (0, 0),
        },
        StartedBy::Sandbox,
    )
}

#[tokio::test]
async fn zero_scrapeable_targets_completes_with_empty_counts() {
    let store = Arc::new(MemoryStore::new());
    let scraper = StubScraper::new();
    let state = scraper.state();

    let mut orch = orchestrator(store, scraper, StubRates::with(&[]));
    let summary = orch.run_full(RunScope::default()).await;

    assert_eq!(summary.prices.succeeded + summary.prices.failed, 0);
    assert_eq!(summary.benchmarks.succeeded + summary.benchmarks.failed, 0);
    assert_eq!(summary.rates.succeeded + summary.rates.failed, 0);
    // No currency targets means the (trivial) rate fetch succeeded.
    assert!(summary.currency_success);
    assert!(summary.fatal.is_none());
    // No page targets, so the browser was never launched.
    assert_eq!(state.launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn full_run_sequences_rates_then_prices_then_benchmarks() {
    let store = Arc::new(MemoryStore::new());
    let usd = currency(&store, "USD");
    let fund = investment(&store, "Global fund", "GB00B4PQW151");
    let index = benchmark(&store, "FTSE All-Share");

    let scraper = StubScraper::new()
        .script(fund, vec![Step::Succeed(123.45)])
        .script(index, vec![Step::Succeed(4321.0)]);
    let state = scraper.state();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut orch = orchestrator(store.clone(), scraper, StubRates::with(&[("USD", 1.27)]))
        .with_events(tx);
    let summary = orch.run_full(RunScope::default()).await;
    drop(orch);

    assert!(summary.currency_success);
    assert_eq!(summary.rates.succeeded, 1);
    assert_eq!(summary.prices.succeeded, 1);
    assert_eq!(summary.benchmarks.succeeded, 1);
    assert!(state.closed.load(Ordering::SeqCst));

    // One event per completed target, in completion order, then the summary.
    let mut order = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            RunEvent::Target { id, .. } => order.push(id),
            RunEvent::Completed(_) => order.push(-1),
        }
    }
    assert_eq!(order, vec![usd, fund, index, -1]);

    // Every attempt is in the audit trail, tagged with how the run started.
    let attempts = store.attempts();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|a| a.success));
    assert!(attempts.iter().all(|a| a.attempt_number == 1));
    assert!(attempts
        .iter()
        .all(|a| a.started_by == StartedBy::Sandbox));
}

#[tokio::test]
async fn browser_death_relaunches_once_and_retries_the_same_target() {
    let store = Arc::new(MemoryStore::new());
    let fund = investment(&store, "Crashy fund", "GB00B4PQW151");

    let scraper = StubScraper::new().script(fund, vec![Step::Die, Step::Succeed(99.5)]);
    let state = scraper.state();

    let mut orch = orchestrator(store.clone(), scraper, StubRates::with(&[]));
    let summary = orch.run_full(RunScope::default()).await;

    assert_eq!(state.relaunches.load(Ordering::SeqCst), 1);
    assert_eq!(summary.prices.succeeded, 1);
    assert_eq!(summary.prices.failed, 0);
    assert!(summary.fatal.is_none());

    // The in-run retry is part of the same attempt: one record per
    // (target, attempt number) pair.
    let attempts = store.attempts();
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].success);
    assert_eq!(attempts[0].attempt_number, 1);
}

#[tokio::test]
async fn failed_relaunch_aborts_remaining_targets_but_keeps_partial_summary() {
    let store = Arc::new(MemoryStore::new());
    currency(&store, "USD");
    let first = investment(&store, "Fine fund", "GB00B4PQW151");
    let second = investment(&store, "Crashy fund", "FR0000120271");
    let third = investment(&store, "Never reached", "US0378331005");

    let scraper = StubScraper::new()
        .script(first, vec![Step::Succeed(10.0)])
        .script(second, vec![Step::Die])
        .failing_relaunch();
    let state = scraper.state();

    let mut orch = orchestrator(store.clone(), scraper, StubRates::with(&[("USD", 1.27)]));
    let summary = orch.run_full(RunScope::default()).await;

    assert!(summary.fatal.is_some());
    assert!(summary.currency_success);
    assert_eq!(summary.prices.succeeded, 1);
    assert_eq!(summary.prices.failed, 1);
    assert_eq!(summary.prices.failed_ids, vec![second]);
    // The third target was never attempted.
    assert!(!store
        .attempts()
        .iter()
        .any(|a| a.target_id == third));
    // The cleanup path still closed the browser.
    assert!(state.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn launch_failure_surfaces_as_failed_summary_not_a_crash() {
    let store = Arc::new(MemoryStore::new());
    currency(&store, "EUR");
    investment(&store, "Unreachable fund", "GB00B4PQW151");

    let scraper = StubScraper::new().failing_launch();
    let mut orch = orchestrator(store.clone(), scraper, StubRates::with(&[("EUR", 1.17)]));
    let summary = orch.run_full(RunScope::default()).await;

    // Rates ran first and still count.
    assert!(summary.currency_success);
    assert_eq!(summary.rates.succeeded, 1);
    assert!(summary.fatal.is_some());
    assert_eq!(summary.prices.succeeded + summary.prices.failed, 0);
}

#[tokio::test]
async fn rate_fetch_failure_marks_currency_unsuccessful_and_records_attempts() {
    let store = Arc::new(MemoryStore::new());
    let usd = currency(&store, "USD");
    let eur = currency(&store, "EUR");

    let mut orch = orchestrator(store.clone(), StubScraper::new(), StubRates::failing());
    let summary = orch.run_full(RunScope::default()).await;

    assert!(!summary.currency_success);
    assert_eq!(summary.rates.failed, 2);
    let attempts = store.attempts();
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|a| !a.success));
    assert!(attempts
        .iter()
        .all(|a| a.error_code.as_deref() == Some("NETWORK_ERROR")));
    assert!(attempts.iter().any(|a| a.target_id == usd));
    assert!(attempts.iter().any(|a| a.target_id == eur));
}

#[tokio::test]
async fn retry_covers_only_the_given_ids_and_skips_unknown_ones() {
    let store = Arc::new(MemoryStore::new());
    let flaky = investment(&store, "Flaky fund", "GB00B4PQW151");
    let steady = investment(&store, "Steady fund", "FR0000120271");

    let scraper = StubScraper::new()
        .script(flaky, vec![Step::Fail(ErrorCode::SelectorTimeout), Step::Succeed(55.0)])
        .script(steady, vec![Step::Succeed(70.0)]);
    let state = scraper.state();

    let mut orch = orchestrator(store.clone(), scraper, StubRates::with(&[]));
    let summary = orch.run_full(RunScope::default()).await;

    assert_eq!(summary.prices.succeeded, 1);
    assert_eq!(summary.prices.failed_ids, vec![flaky]);
    assert!(summary.has_retryable_failures());

    let scrapes_before_retry = state.scrapes.load(Ordering::SeqCst);

    // Include an id that no longer exists; it must be silently skipped.
    let mut failed = summary.failed_items();
    failed.prices.push(9999);
    failed.currency = false;
    let retry = orch.retry_failed(&failed, 2).await;

    assert_eq!(retry.prices.succeeded, 1);
    assert_eq!(retry.prices.failed, 0);
    // Only the flaky target was re-scraped.
    assert_eq!(state.scrapes.load(Ordering::SeqCst), scrapes_before_retry + 1);

    let numbers: Vec<u8> = store
        .attempts()
        .iter()
        .filter(|a| a.target_id == flaky)
        .map(|a| a.attempt_number)
        .collect();
    assert_eq!(numbers, vec![1, 2]);
}

#[tokio::test]
async fn configuration_gaps_are_excluded_from_the_retry_set() {
    let store = Arc::new(MemoryStore::new());
    let broken = investment(&store, "Misconfigured fund", "GB00B4PQW151");

    let scraper = StubScraper::new().script(broken, vec![Step::Fail(ErrorCode::NoSelector)]);
    let mut orch = orchestrator(store.clone(), scraper, StubRates::with(&[]));
    let summary = orch.run_full(RunScope::default()).await;

    assert_eq!(summary.prices.failed_ids, vec![broken]);
    assert!(summary.prices.retryable_ids.is_empty());
    assert!(summary.failed_items().prices.is_empty());
}

#[tokio::test]
async fn dropped_event_receiver_cancels_the_rest_of_the_run() {
    let store = Arc::new(MemoryStore::new());
    let first = investment(&store, "First fund", "GB00B4PQW151");
    let second = investment(&store, "Second fund", "FR0000120271");

    let scraper = StubScraper::new()
        .script(first, vec![Step::Succeed(1.0)])
        .script(second, vec![Step::Succeed(2.0)]);
    let state = scraper.state();

    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);

    let mut orch = orchestrator(store.clone(), scraper, StubRates::with(&[])).with_events(tx);
    let summary = orch.run_full(RunScope::default()).await;

    // The first target finished; the second was never started.
    assert_eq!(state.scrapes.load(Ordering::SeqCst), 1);
    assert_eq!(summary.prices.succeeded, 1);
    // Cancellation still went through the cleanup path.
    assert!(state.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn discovered_urls_are_written_back_to_the_target() {
    let store = Arc::new(MemoryStore::new());
    let fund = investment(&store, "Renamed fund", "GB00B4PQW151");

    let discovered = "https://www.morningstar.co.uk/uk/funds/snapshot.aspx?id=F0GBR04AO1";
    let scraper = StubScraper::new()
        .script(fund, vec![Step::SucceedWithWriteBack(42.0, discovered)]);

    let mut orch = orchestrator(store.clone(), scraper, StubRates::with(&[]));
    let summary = orch.run_full(RunScope::default()).await;

    assert_eq!(summary.prices.succeeded, 1);
    let target = store
        .get_target(TargetKind::Investment, fund)
        .unwrap()
        .unwrap();
    assert_eq!(target.url.as_deref(), Some(discovered));
    // Selector is left to pattern-table resolution on later runs.
    assert_eq!(target.selector, None);
}

#[tokio::test]
async fn observed_values_land_in_storage_with_the_run_date() {
    let store = Arc::new(MemoryStore::new());
    let fund = investment(&store, "Stored fund", "GB00B4PQW151");

    let scraper = StubScraper::new().script(fund, vec![Step::Succeed(321.0)]);
    let mut orch = orchestrator(store.clone(), scraper, StubRates::with(&[]));
    orch.run_full(RunScope::default()).await;

    let today = chrono::Utc::now().date_naive();
    assert_eq!(store.observed_value(fund, today), Some(321.0));

    let target = store
        .get_target(TargetKind::Investment, fund)
        .unwrap()
        .unwrap();
    assert_eq!(target.last_value, Some(321.0));
}

#[tokio::test]
async fn retry_without_currency_leaves_rates_alone() {
    let store = Arc::new(MemoryStore::new());
    currency(&store, "USD");
    let fund = investment(&store, "Fund", "GB00B4PQW151");

    let scraper = StubScraper::new()
        .script(fund, vec![Step::Fail(ErrorCode::NetworkError), Step::Succeed(5.0)]);
    let rates = StubRates::with(&[("USD", 1.27)]);
    let rate_calls = rates.calls.clone();

    let mut orch = orchestrator(store.clone(), scraper, rates);
    let summary = orch.run_full(RunScope::default()).await;
    assert_eq!(rate_calls.load(Ordering::SeqCst), 1);

    let failed = FailedItems {
        prices: summary.prices.retryable_ids.clone(),
        benchmarks: vec![],
        currency: false,
    };
    let retry = orch.retry_failed(&failed, 2).await;

    // The rate fetch did not re-run.
    assert_eq!(rate_calls.load(Ordering::SeqCst), 1);
    assert!(retry.currency_success);
    assert_eq!(retry.prices.succeeded, 1);
}
