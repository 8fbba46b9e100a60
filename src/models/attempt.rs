//! Scrape attempt audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TargetKind;

/// What initiated a scrape run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartedBy {
    /// A user-initiated run (CLI or UI).
    Interactive,
    /// An unattended run (cron or similar).
    Scheduled,
    /// A test-harness run against throwaway storage.
    Sandbox,
}

impl StartedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartedBy::Interactive => "interactive",
            StartedBy::Scheduled => "scheduled",
            StartedBy::Sandbox => "sandbox",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "interactive" => Some(StartedBy::Interactive),
            "scheduled" => Some(StartedBy::Scheduled),
            "sandbox" => Some(StartedBy::Sandbox),
            _ => None,
        }
    }
}

impl std::fmt::Display for StartedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record of one try at one target.
///
/// Exactly one record exists per (target, attempt number) pair per run;
/// records are never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeAttempt {
    pub target_kind: TargetKind,
    pub target_id: i64,
    pub attempted_at: DateTime<Utc>,
    pub started_by: StartedBy,
    /// 1 for the initial batch pass, 2-5 for caller-level retries.
    pub attempt_number: u8,
    pub success: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}
