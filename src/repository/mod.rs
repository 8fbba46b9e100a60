//! Storage layer.
//!
//! The scraping core only ever talks to the `Store` trait; the SQLite
//! implementation backs the CLI, the in-memory one backs tests and the
//! sandbox. Attempt recording is best-effort from the core's point of view:
//! the orchestrator logs, and swallows, storage errors on that path.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use thiserror::Error;

use crate::models::{ScrapeAttempt, ScrapeTarget, TargetKind};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage operations the scraping core depends on.
pub trait Store: Send + Sync {
    /// Targets of a kind that can be scraped: a manual URL or a public
    /// identifier to derive one from. Currency targets need neither.
    fn list_scrapeable(&self, kind: TargetKind) -> Result<Vec<ScrapeTarget>>;

    fn get_target(&self, kind: TargetKind, id: i64) -> Result<Option<ScrapeTarget>>;

    /// Persist a URL discovered through the secondary provider so later
    /// runs go direct. A None selector leaves selector resolution to the
    /// site-pattern table.
    fn write_back_discovered_url(
        &self,
        kind: TargetKind,
        id: i64,
        url: &str,
        selector: Option<&str>,
    ) -> Result<()>;

    /// Record the value observed for a target on a date. One value per
    /// (target, date); a re-scrape the same day overwrites.
    fn upsert_observed_value(
        &self,
        target_id: i64,
        date: NaiveDate,
        time: NaiveTime,
        value: f64,
    ) -> Result<()>;

    /// Append one immutable attempt record.
    fn record_attempt(&self, attempt: &ScrapeAttempt) -> Result<()>;

    /// When the last successful attempt happened, overall or per kind.
    /// Used to decide whether a run is overdue.
    fn last_successful_attempt(&self, kind: Option<TargetKind>) -> Result<Option<DateTime<Utc>>>;
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
