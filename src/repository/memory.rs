//! In-memory store for tests and sandbox runs.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::models::{ScrapeAttempt, ScrapeTarget, TargetKind};

use super::{Result, Store};

#[derive(Default)]
struct Inner {
    targets: Vec<ScrapeTarget>,
    values: HashMap<(i64, NaiveDate), (NaiveTime, f64)>,
    attempts: Vec<ScrapeAttempt>,
}

/// Store backed by process memory. Nothing survives the process; that is
/// the point for sandbox runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_target(&self, mut target: ScrapeTarget) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.targets.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        target.id = id;
        inner.targets.push(target);
        id
    }

    /// All recorded attempts, for assertions.
    pub fn attempts(&self) -> Vec<ScrapeAttempt> {
        self.inner.lock().unwrap().attempts.clone()
    }

    /// The value recorded for a target on a date, for assertions.
    pub fn observed_value(&self, target_id: i64, date: NaiveDate) -> Option<f64> {
        self.inner
            .lock()
            .unwrap()
            .values
            .get(&(target_id, date))
            .map(|(_, v)| *v)
    }
}

impl Store for MemoryStore {
    fn list_scrapeable(&self, kind: TargetKind) -> Result<Vec<ScrapeTarget>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .targets
            .iter()
            .filter(|t| {
                t.kind == kind
                    && (kind == TargetKind::Currency || t.url.is_some() || t.public_id.is_some())
            })
            .cloned()
            .collect())
    }

    fn get_target(&self, kind: TargetKind, id: i64) -> Result<Option<ScrapeTarget>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .targets
            .iter()
            .find(|t| t.kind == kind && t.id == id)
            .cloned())
    }

    fn write_back_discovered_url(
        &self,
        kind: TargetKind,
        id: i64,
        url: &str,
        selector: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(target) = inner.targets.iter_mut().find(|t| t.kind == kind && t.id == id) {
            target.url = Some(url.to_string());
            target.selector = selector.map(|s| s.to_string());
        }
        Ok(())
    }

    fn upsert_observed_value(
        &self,
        target_id: i64,
        date: NaiveDate,
        time: NaiveTime,
        value: f64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.values.insert((target_id, date), (time, value));
        if let Some(target) = inner.targets.iter_mut().find(|t| t.id == target_id) {
            target.last_value = Some(value);
        }
        Ok(())
    }

    fn record_attempt(&self, attempt: &ScrapeAttempt) -> Result<()> {
        self.inner.lock().unwrap().attempts.push(attempt.clone());
        Ok(())
    }

    fn last_successful_attempt(&self, kind: Option<TargetKind>) -> Result<Option<DateTime<Utc>>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .attempts
            .iter()
            .filter(|a| a.success && kind.map_or(true, |k| a.target_kind == k))
            .map(|a| a.attempted_at)
            .max())
    }
}
