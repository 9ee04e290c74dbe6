//! SQLite store implementation.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult, Row};
use thiserror::Error;

use super::models::*;
use crate::incident::IncidentKind;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

const TARGET_COLS: &str = "id, url, enabled, interval_secs, response_time_threshold_ms, \
     certificate_monitoring, certificate_expired_before_secs, follow_redirects, max_retries, \
     retry_interval_secs, dns_timeout_ms, dial_timeout_ms, tls_handshake_timeout_ms, \
     response_header_timeout_ms, is_up, status_code, response_time_ms, certificate_expired_date, \
     last_up, last_down, retries, created_at, updated_at";

/// Thread-safe store over a single SQLite connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        if let Some(dir) = path.as_ref().parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let conn = Connection::open(path)?;
        // journal_mode reports the resulting mode as a row, so it cannot go
        // through execute().
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Create tables and indices. Safe to run on every startup.
    fn migrate(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS targets (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                enabled INTEGER NOT NULL DEFAULT 1,
                interval_secs INTEGER NOT NULL DEFAULT 300,
                response_time_threshold_ms INTEGER NOT NULL DEFAULT 30000,
                certificate_monitoring INTEGER NOT NULL DEFAULT 0,
                certificate_expired_before_secs INTEGER NOT NULL DEFAULT 2678400,
                follow_redirects INTEGER NOT NULL DEFAULT 1,
                max_retries INTEGER NOT NULL DEFAULT 3,
                retry_interval_secs INTEGER NOT NULL DEFAULT 60,
                dns_timeout_ms INTEGER NOT NULL DEFAULT 5000,
                dial_timeout_ms INTEGER NOT NULL DEFAULT 10000,
                tls_handshake_timeout_ms INTEGER NOT NULL DEFAULT 10000,
                response_header_timeout_ms INTEGER NOT NULL DEFAULT 20000,
                is_up INTEGER,
                status_code INTEGER,
                response_time_ms INTEGER,
                certificate_expired_date TEXT,
                last_up TEXT,
                last_down TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS check_samples (
                id TEXT PRIMARY KEY,
                target_id TEXT NOT NULL REFERENCES targets(id),
                is_up INTEGER NOT NULL,
                status_code INTEGER NOT NULL,
                response_time_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_samples_target_created
                ON check_samples (target_id, created_at DESC);
            CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY,
                target_id TEXT NOT NULL REFERENCES targets(id),
                remote_id INTEGER,
                kind TEXT NOT NULL,
                description TEXT NOT NULL,
                created_at TEXT NOT NULL,
                solved_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_incidents_target_kind_solved
                ON incidents (target_id, kind, solved_at);",
        )?;

        // Column added after the retry feature landed; fails harmlessly once present.
        let _ = conn.execute_batch("ALTER TABLE targets ADD COLUMN retries INTEGER NOT NULL DEFAULT 0;");

        Ok(())
    }

    // --- Targets ---

    /// Insert a target, or update its configuration columns when a row with
    /// the same URL already exists. Observed state survives reconfiguration.
    pub fn upsert_target_config(&self, t: &Target) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO targets (id, url, enabled, interval_secs, response_time_threshold_ms,
                 certificate_monitoring, certificate_expired_before_secs, follow_redirects,
                 max_retries, retry_interval_secs, dns_timeout_ms, dial_timeout_ms,
                 tls_handshake_timeout_ms, response_header_timeout_ms, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(url) DO UPDATE SET
                 enabled = excluded.enabled,
                 interval_secs = excluded.interval_secs,
                 response_time_threshold_ms = excluded.response_time_threshold_ms,
                 certificate_monitoring = excluded.certificate_monitoring,
                 certificate_expired_before_secs = excluded.certificate_expired_before_secs,
                 follow_redirects = excluded.follow_redirects,
                 max_retries = excluded.max_retries,
                 retry_interval_secs = excluded.retry_interval_secs,
                 dns_timeout_ms = excluded.dns_timeout_ms,
                 dial_timeout_ms = excluded.dial_timeout_ms,
                 tls_handshake_timeout_ms = excluded.tls_handshake_timeout_ms,
                 response_header_timeout_ms = excluded.response_header_timeout_ms",
            params![
                t.id,
                t.url,
                t.enabled,
                t.interval.as_secs() as i64,
                t.response_time_threshold.as_millis() as i64,
                t.certificate_monitoring,
                t.certificate_expired_before.as_secs() as i64,
                t.follow_redirects,
                t.max_retries,
                t.retry_interval.as_secs() as i64,
                t.dns_timeout.as_millis() as i64,
                t.dial_timeout.as_millis() as i64,
                t.tls_handshake_timeout.as_millis() as i64,
                t.response_header_timeout.as_millis() as i64,
                fmt_time(t.created_at),
                fmt_time(t.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Persist the observed state of a target after a check.
    pub fn update_target_state(&self, t: &Target) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE targets SET is_up = ?1, status_code = ?2, response_time_ms = ?3,
                 certificate_expired_date = ?4, last_up = ?5, last_down = ?6,
                 retries = ?7, updated_at = ?8
             WHERE id = ?9",
            params![
                t.is_up,
                t.status_code,
                t.response_time_ms,
                t.certificate_expired_date.map(fmt_time),
                t.last_up.map(fmt_time),
                t.last_down.map(fmt_time),
                t.retries,
                fmt_time(t.updated_at),
                t.id,
            ],
        )?;
        Ok(())
    }

    /// Get all targets.
    pub fn list_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT {TARGET_COLS} FROM targets ORDER BY url"))?;
        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }

    /// Get a target by URL.
    pub fn get_target(&self, url: &str) -> Result<Option<Target>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT {TARGET_COLS} FROM targets WHERE url = ?1"))?;
        let mut rows = stmt.query_map(params![url], target_from_row)?;
        Ok(rows.next().transpose()?)
    }

    /// Get a target by URL joined with its most recent `limit` samples.
    pub fn get_target_with_history(&self, url: &str, limit: u32) -> Result<Option<TargetReport>, DbError> {
        let target = match self.get_target(url)? {
            Some(t) => t,
            None => return Ok(None),
        };
        let histories = self.samples_for_target(&target.id, limit)?;
        Ok(Some(TargetReport { target, histories }))
    }

    // --- Check samples ---

    /// Append one probe outcome.
    pub fn append_sample(&self, s: &CheckSample) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO check_samples (id, target_id, is_up, status_code, response_time_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                s.id,
                s.target_id,
                s.is_up,
                s.status_code,
                s.response_time_ms,
                fmt_time(s.created_at),
            ],
        )?;
        Ok(())
    }

    /// The most recent samples for a target, newest first.
    pub fn samples_for_target(&self, target_id: &str, limit: u32) -> Result<Vec<CheckSample>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, target_id, is_up, status_code, response_time_ms, created_at
             FROM check_samples WHERE target_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let samples = stmt
            .query_map(params![target_id, limit], |row| {
                Ok(CheckSample {
                    id: row.get(0)?,
                    target_id: row.get(1)?,
                    is_up: row.get(2)?,
                    status_code: row.get(3)?,
                    response_time_ms: row.get(4)?,
                    created_at: required_time(row.get::<_, String>(5)?),
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(samples)
    }

    // --- Incidents ---

    /// Insert a new incident record.
    pub fn create_incident(&self, inc: &Incident) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO incidents (id, target_id, remote_id, kind, description, created_at, solved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                inc.id,
                inc.target_id,
                inc.remote_id.map(|v| v as i64),
                inc.kind.as_str(),
                inc.description,
                fmt_time(inc.created_at),
                inc.solved_at.map(fmt_time),
            ],
        )?;
        Ok(())
    }

    /// The open incident of the given kind for the target with this URL,
    /// if one exists.
    pub fn last_open_incident(&self, url: &str, kind: IncidentKind) -> Result<Option<Incident>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT i.id, i.target_id, i.remote_id, i.kind, i.description, i.created_at, i.solved_at
             FROM incidents i JOIN targets t ON t.id = i.target_id
             WHERE t.url = ?1 AND i.kind = ?2 AND i.solved_at IS NULL
             ORDER BY i.created_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![url, kind.as_str()], incident_from_row)?;
        Ok(rows.next().transpose()?)
    }

    /// Record the identifier the alert sink assigned to an incident.
    pub fn set_incident_remote_id(&self, id: &str, remote_id: u64) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE incidents SET remote_id = ?1 WHERE id = ?2",
            params![remote_id as i64, id],
        )?;
        Ok(())
    }

    /// Replace the description of a still-open incident.
    pub fn upgrade_incident_description(&self, id: &str, description: &str) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE incidents SET description = ?1 WHERE id = ?2 AND solved_at IS NULL",
            params![description, id],
        )?;
        Ok(())
    }

    /// Mark an incident as solved. Resolution is final: a solved incident is
    /// never re-opened and its timestamp is never rewritten.
    pub fn resolve_incident(&self, id: &str, at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE incidents SET solved_at = ?1 WHERE id = ?2 AND solved_at IS NULL",
            params![fmt_time(at), id],
        )?;
        Ok(())
    }
}

fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn required_time(s: String) -> DateTime<Utc> {
    parse_time(&s).unwrap_or_else(Utc::now)
}

fn optional_time(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| parse_time(&s))
}

fn target_from_row(row: &Row<'_>) -> SqlResult<Target> {
    Ok(Target {
        id: row.get(0)?,
        url: row.get(1)?,
        enabled: row.get(2)?,
        interval: Duration::from_secs(row.get::<_, u64>(3)?),
        response_time_threshold: Duration::from_millis(row.get::<_, u64>(4)?),
        certificate_monitoring: row.get(5)?,
        certificate_expired_before: Duration::from_secs(row.get::<_, u64>(6)?),
        follow_redirects: row.get(7)?,
        max_retries: row.get(8)?,
        retry_interval: Duration::from_secs(row.get::<_, u64>(9)?),
        dns_timeout: Duration::from_millis(row.get::<_, u64>(10)?),
        dial_timeout: Duration::from_millis(row.get::<_, u64>(11)?),
        tls_handshake_timeout: Duration::from_millis(row.get::<_, u64>(12)?),
        response_header_timeout: Duration::from_millis(row.get::<_, u64>(13)?),
        is_up: row.get(14)?,
        status_code: row.get(15)?,
        response_time_ms: row.get(16)?,
        certificate_expired_date: optional_time(row.get(17)?),
        last_up: optional_time(row.get(18)?),
        last_down: optional_time(row.get(19)?),
        retries: row.get(20)?,
        created_at: required_time(row.get::<_, String>(21)?),
        updated_at: required_time(row.get::<_, String>(22)?),
    })
}

fn incident_from_row(row: &Row<'_>) -> SqlResult<Incident> {
    let kind_str: String = row.get(3)?;
    let kind = kind_str.parse::<IncidentKind>().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown incident kind '{kind_str}'").into(),
        )
    })?;

    Ok(Incident {
        id: row.get(0)?,
        target_id: row.get(1)?,
        remote_id: row.get::<_, Option<i64>>(2)?.map(|v| v as u64),
        kind,
        description: row.get(4)?,
        created_at: required_time(row.get::<_, String>(5)?),
        solved_at: optional_time(row.get(6)?),
    })
}
