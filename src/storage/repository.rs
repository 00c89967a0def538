use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::date_util::{format_timestamp, parse_timestamp};
use crate::sync::item::{Priority, SourceType};
use crate::sync::SyncReport;

/// A locally recorded change as stored in `pending_changes`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalRecord {
    pub domain: SourceType,
    pub record_id: String,
    pub captured_at: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
    pub priority: Option<Priority>,
    pub revision: i64,
}

/// A change to record, before it has a revision.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChange {
    pub domain: SourceType,
    pub record_id: String,
    pub captured_at: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
    pub priority: Option<Priority>,
}

impl NewChange {
    pub fn new(domain: SourceType, record_id: impl Into<String>) -> Self {
        Self {
            domain,
            record_id: record_id.into(),
            captured_at: None,
            payload: serde_json::Value::Object(Default::default()),
            priority: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRunRow {
    pub id: i64,
    pub status: String,
    pub started_at: String,
    pub finished_at: String,
    pub items_total: i64,
    pub items_synced: i64,
    pub batches_completed: i64,
    pub batches_total: i64,
    pub error_message: Option<String>,
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

// ── Pending Changes ────────────────────────────────────────────────

/// Insert or update a local change. Re-recording an existing record bumps
/// its revision and marks it pending again.
pub fn record_change(conn: &Connection, change: &NewChange) -> Result<(), rusqlite::Error> {
    let payload = serde_json::to_string(&change.payload)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO pending_changes
            (domain, record_id, captured_at, payload, priority, revision, recorded_at, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, NULL)
         ON CONFLICT (domain, record_id) DO UPDATE SET
            captured_at = excluded.captured_at,
            payload = excluded.payload,
            priority = excluded.priority,
            revision = pending_changes.revision + 1,
            recorded_at = excluded.recorded_at,
            synced_at = NULL",
        params![
            change.domain.as_str(),
            change.record_id,
            change.captured_at.as_ref().map(format_timestamp),
            payload,
            change.priority.map(Priority::as_str),
            format_timestamp(&Utc::now()),
        ],
    )?;
    Ok(())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<LocalRecord, rusqlite::Error> {
    let domain: String = row.get(0)?;
    let captured_at: Option<String> = row.get(2)?;
    let payload: String = row.get(3)?;
    let priority: Option<String> = row.get(4)?;

    Ok(LocalRecord {
        domain: domain
            .parse()
            .map_err(|e: crate::Error| conversion_error(0, e.to_string()))?,
        record_id: row.get(1)?,
        captured_at: captured_at.as_deref().and_then(parse_timestamp),
        payload: serde_json::from_str(&payload)
            .map_err(|e| conversion_error(3, e.to_string()))?,
        priority: priority
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e: crate::Error| conversion_error(4, e.to_string()))?,
        revision: row.get(5)?,
    })
}

/// Unsynced records of one domain, in recording order.
pub fn list_unsynced(
    conn: &Connection,
    domain: SourceType,
) -> Result<Vec<LocalRecord>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT domain, record_id, captured_at, payload, priority, revision
         FROM pending_changes
         WHERE domain = ?1 AND synced_at IS NULL
         ORDER BY recorded_at, record_id",
    )?;
    let rows = stmt.query_map(params![domain.as_str()], row_to_record)?;
    rows.collect()
}

pub fn count_unsynced(conn: &Connection, domain: SourceType) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        "SELECT COUNT(*) FROM pending_changes WHERE domain = ?1 AND synced_at IS NULL",
        params![domain.as_str()],
        |row| row.get(0),
    )
}

/// Mark the given `(record_id, revision)` pairs as synced. A record whose
/// revision moved on since it was read stays pending. Returns rows marked.
pub fn mark_synced(
    conn: &mut Connection,
    domain: SourceType,
    records: &[(String, i64)],
) -> Result<usize, rusqlite::Error> {
    let now = format_timestamp(&Utc::now());
    let tx = conn.transaction()?;
    let mut marked = 0;
    {
        let mut stmt = tx.prepare(
            "UPDATE pending_changes SET synced_at = ?1
             WHERE domain = ?2 AND record_id = ?3 AND revision = ?4 AND synced_at IS NULL",
        )?;
        for (record_id, revision) in records {
            marked += stmt.execute(params![now, domain.as_str(), record_id, revision])?;
        }
    }
    tx.commit()?;
    Ok(marked)
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn unset_config(conn: &Connection, key: &str) -> Result<bool, rusqlite::Error> {
    let n = conn.execute("DELETE FROM app_config WHERE key = ?1", params![key])?;
    Ok(n > 0)
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Sync Runs ──────────────────────────────────────────────────────

pub fn insert_sync_run(conn: &Connection, report: &SyncReport) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO sync_runs (
            status, started_at, finished_at, items_total, items_synced,
            batches_completed, batches_total, error_message
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            report.status.as_str(),
            format_timestamp(&report.started_at),
            format_timestamp(&report.finished_at),
            report.items_total as i64,
            report.items_synced as i64,
            report.batches_completed as i64,
            report.batches_total as i64,
            report.error,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Most recent runs first.
pub fn list_sync_runs(conn: &Connection, limit: u32) -> Result<Vec<SyncRunRow>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, status, started_at, finished_at, items_total, items_synced,
                batches_completed, batches_total, error_message
         FROM sync_runs ORDER BY finished_at DESC, id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(SyncRunRow {
            id: row.get(0)?,
            status: row.get(1)?,
            started_at: row.get(2)?,
            finished_at: row.get(3)?,
            items_total: row.get(4)?,
            items_synced: row.get(5)?,
            batches_completed: row.get(6)?,
            batches_total: row.get(7)?,
            error_message: row.get(8)?,
        })
    })?;
    rows.collect()
}

pub fn last_success_at(conn: &Connection) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    let finished: Option<String> = conn
        .query_row(
            "SELECT MAX(finished_at) FROM sync_runs WHERE status = 'succeeded'",
            [],
            |row| row.get(0),
        )?;
    Ok(finished.as_deref().and_then(parse_timestamp))
}
