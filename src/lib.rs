//! quotefetch - market data acquisition.
//!
//! Scrapes security prices, benchmark index levels and currency exchange
//! rates from financial web pages that expose no public API, using a
//! stealth-configured headless browser, a multi-stage URL/selector fallback
//! resolver, domain-aware randomized delays and a run-level orchestrator
//! with an audit trail of every attempt.

pub mod cli;
pub mod config;
pub mod models;
pub mod repository;
pub mod scrapers;
