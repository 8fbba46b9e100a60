//! SQLite-backed store.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{ScrapeAttempt, ScrapeTarget, TargetKind};

use super::{parse_datetime, Result, Store, StoreError};

/// SQLite-backed store. Opens a connection per operation; the workload is
/// one writer, low volume.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Other(format!("create data dir: {e}")))?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS targets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                url TEXT,
                selector TEXT,
                public_id TEXT,
                currency TEXT NOT NULL,
                last_value REAL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS observed_values (
                target_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                time TEXT NOT NULL,
                value REAL NOT NULL,
                PRIMARY KEY (target_id, date)
            );
            CREATE TABLE IF NOT EXISTS scrape_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                target_kind TEXT NOT NULL,
                target_id INTEGER NOT NULL,
                attempted_at TEXT NOT NULL,
                started_by TEXT NOT NULL,
                attempt_number INTEGER NOT NULL,
                success INTEGER NOT NULL,
                error_code TEXT,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_attempts_kind_time
                ON scrape_attempts (target_kind, attempted_at);
        "#,
        )?;
        Ok(())
    }

    /// Insert a target. Management plumbing for the CLI, not used by the
    /// scraping core.
    pub fn add_target(&self, target: &ScrapeTarget) -> Result<i64> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO targets (kind, name, url, selector, public_id, currency, last_value, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                target.kind.as_str(),
                target.name,
                target.url,
                target.selector,
                target.public_id,
                target.currency,
                target.last_value,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All targets of a kind, scrapeable or not.
    pub fn list_targets(&self, kind: TargetKind) -> Result<Vec<ScrapeTarget>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, name, url, selector, public_id, currency, last_value
             FROM targets WHERE kind = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![kind.as_str()], row_to_target)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_target(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScrapeTarget> {
    Ok(ScrapeTarget {
        id: row.get("id")?,
        kind: TargetKind::from_str(&row.get::<_, String>("kind")?)
            .unwrap_or(TargetKind::Investment),
        name: row.get("name")?,
        url: row.get("url")?,
        selector: row.get("selector")?,
        public_id: row.get("public_id")?,
        currency: row.get("currency")?,
        last_value: row.get("last_value")?,
    })
}

impl Store for SqliteStore {
    fn list_scrapeable(&self, kind: TargetKind) -> Result<Vec<ScrapeTarget>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, name, url, selector, public_id, currency, last_value
             FROM targets
             WHERE kind = ?1 AND (?1 = 'currency' OR url IS NOT NULL OR public_id IS NOT NULL)
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![kind.as_str()], row_to_target)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn get_target(&self, kind: TargetKind, id: i64) -> Result<Option<ScrapeTarget>> {
        let conn = self.connect()?;
        let target = conn
            .query_row(
                "SELECT id, kind, name, url, selector, public_id, currency, last_value
                 FROM targets WHERE kind = ?1 AND id = ?2",
                params![kind.as_str(), id],
                row_to_target,
            )
            .optional()?;
        Ok(target)
    }

    fn write_back_discovered_url(
        &self,
        kind: TargetKind,
        id: i64,
        url: &str,
        selector: Option<&str>,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE targets SET url = ?3, selector = ?4 WHERE kind = ?1 AND id = ?2",
            params![kind.as_str(), id, url, selector],
        )?;
        Ok(())
    }

    fn upsert_observed_value(
        &self,
        target_id: i64,
        date: NaiveDate,
        time: NaiveTime,
        value: f64,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO observed_values (target_id, date, time, value)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(target_id, date) DO UPDATE SET
                time = excluded.time,
                value = excluded.value
            "#,
            params![
                target_id,
                date.to_string(),
                time.format("%H:%M:%S").to_string(),
                value,
            ],
        )?;
        conn.execute(
            "UPDATE targets SET last_value = ?2 WHERE id = ?1",
            params![target_id, value],
        )?;
        Ok(())
    }

    fn record_attempt(&self, attempt: &ScrapeAttempt) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO scrape_attempts
                (target_kind, target_id, attempted_at, started_by, attempt_number,
                 success, error_code, error_message)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                attempt.target_kind.as_str(),
                attempt.target_id,
                attempt.attempted_at.to_rfc3339(),
                attempt.started_by.as_str(),
                attempt.attempt_number,
                attempt.success,
                attempt.error_code,
                attempt.error_message,
            ],
        )?;
        Ok(())
    }

    fn last_successful_attempt(&self, kind: Option<TargetKind>) -> Result<Option<DateTime<Utc>>> {
        let conn = self.connect()?;
        let raw: Option<String> = match kind {
            Some(kind) => conn
                .query_row(
                    "SELECT MAX(attempted_at) FROM scrape_attempts
                     WHERE success = 1 AND target_kind = ?1",
                    params![kind.as_str()],
                    |row| row.get(0),
                )
                .optional()?
                .flatten(),
            None => conn
                .query_row(
                    "SELECT MAX(attempted_at) FROM scrape_attempts WHERE success = 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?
                .flatten(),
        };
        Ok(raw.map(|s| parse_datetime(&s)))
    }
}
