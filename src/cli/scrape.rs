//! Scrape command: full runs with streamed progress and caller-level retries.

use std::sync::Arc;

use console::style;
use tokio::sync::mpsc;

use crate::config::Settings;
use crate::models::{StartedBy, TargetKind};
use crate::repository::SqliteStore;
use crate::scrapers::{
    BrowserTargetScraper, HttpRateFetcher, Orchestrator, RunEvent, RunScope, RunSummary,
    ScrapeResult,
};

type CliOrchestrator = Orchestrator<BrowserTargetScraper, HttpRateFetcher>;

fn build_orchestrator(
    settings: &Settings,
    started_by: StartedBy,
    profile_flag: Option<&str>,
) -> anyhow::Result<(CliOrchestrator, mpsc::UnboundedReceiver<RunEvent>)> {
    let store = Arc::new(SqliteStore::new(&settings.database_path())?);
    let scraper = BrowserTargetScraper::new(settings.browser.clone(), settings.sites.clone());
    let rates = HttpRateFetcher::new(settings.rates_endpoint.clone());
    let profile = settings.active_delay_profile(profile_flag, started_by);

    let (tx, rx) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(
        store,
        scraper,
        rates,
        settings.sites.clone(),
        settings.base_currency.clone(),
        profile,
        started_by,
    )
    .with_events(tx);

    Ok((orchestrator, rx))
}

fn print_target_event(kind: TargetKind, name: &str, result: &ScrapeResult) {
    if result.success {
        let value = result
            .normalized_value
            .map(|v| v.to_string())
            .unwrap_or_default();
        let fallback = if result.fallback_used { " (via fallback)" } else { "" };
        println!(
            "  {} {} [{}] {}{}",
            style("✓").green(),
            name,
            kind,
            value,
            fallback
        );
    } else {
        let reason = result
            .error
            .as_ref()
            .map(|e| format!("{}: {}", e.code, e.diagnostic()))
            .unwrap_or_else(|| "unknown failure".to_string());
        println!("  {} {} [{}] {}", style("✗").red(), name, kind, reason);
    }
}

fn print_summary(summary: &RunSummary) {
    println!(
        "{} Run {} ({}): rates {}/{}, prices {}/{}, benchmarks {}/{}",
        style("→").cyan(),
        summary.run_id,
        summary.started_by,
        summary.rates.succeeded,
        summary.rates.succeeded + summary.rates.failed,
        summary.prices.succeeded,
        summary.prices.succeeded + summary.prices.failed,
        summary.benchmarks.succeeded,
        summary.benchmarks.succeeded + summary.benchmarks.failed,
    );
    if !summary.currency_success {
        println!("  {} currency rate fetch incomplete", style("✗").red());
    }
    if let Some(fatal) = &summary.fatal {
        println!("  {} run aborted early: {}", style("✗").red(), fatal);
    }
}

pub async fn cmd_scrape(
    settings: &Settings,
    profile_flag: Option<&str>,
    scheduled: bool,
    attempts: u8,
    scope: RunScope,
) -> anyhow::Result<()> {
    let started_by = if scheduled {
        StartedBy::Scheduled
    } else {
        StartedBy::Interactive
    };

    let (mut orchestrator, mut rx) = build_orchestrator(settings, started_by, profile_flag)?;

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let RunEvent::Target { kind, name, result, .. } = event {
                print_target_event(kind, &name, &result);
            }
        }
    });

    let mut summary = orchestrator.run_full(scope).await;

    let mut attempt = 2;
    while attempt <= attempts && summary.has_retryable_failures() {
        println!(
            "{} Retrying failed targets (attempt {}/{})",
            style("↻").cyan(),
            attempt,
            attempts
        );
        // The retry summary is the updated failure list; loop on it.
        summary = orchestrator.retry_failed(&summary.failed_items(), attempt).await;
        attempt += 1;
    }

    drop(orchestrator);
    let _ = printer.await;

    print_summary(&summary);
    Ok(())
}

pub async fn cmd_scrape_one(
    settings: &Settings,
    kind: TargetKind,
    id: i64,
) -> anyhow::Result<()> {
    let (mut orchestrator, mut rx) = build_orchestrator(settings, StartedBy::Interactive, None)?;

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let RunEvent::Target { kind, name, result, .. } = event {
                print_target_event(kind, &name, &result);
            }
        }
    });

    let result = orchestrator.scrape_one(kind, id).await;

    drop(orchestrator);
    let _ = printer.await;

    let result = result?;
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
