//! SQLite storage implementations
//!
//! Each store owns one connection behind a `Mutex`. Upserts read, merge and
//! write while holding that lock, so writes to the same key are serialized.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{ReportStore, StoreError, StoreResult, TriggerStore};
use crate::calendar::Month;
use crate::models::ReportRecord;
use crate::scheduler::PeriodicTrigger;

fn open_connection(path: &Path) -> StoreResult<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

fn lock(conn: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| StoreError::Poisoned)
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(format!("timestamp '{raw}': {e}")))
}

// ============================================================================
// Report Store
// ============================================================================

/// SQLite-backed [`ReportStore`]
pub struct SqliteReportStore {
    conn: Mutex<Connection>,
}

type RawRecord = (String, String, String, Option<String>, Option<String>, i64);

impl SqliteReportStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let store = Self {
            conn: Mutex::new(open_connection(path)?),
        };
        store.create_schema()?;
        tracing::info!(path = %path.display(), "SQLite report store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> StoreResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS report_records (
                    provider_id TEXT NOT NULL,
                    report_type TEXT NOT NULL,
                    month TEXT NOT NULL,
                    payload TEXT,
                    failure_reason TEXT,
                    attempt_count INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (provider_id, report_type, month)
                );

                CREATE INDEX IF NOT EXISTS idx_report_records_failures
                    ON report_records(provider_id, failure_reason)
                    WHERE failure_reason IS NOT NULL;
                "#,
        )?;
        Ok(())
    }

    fn decode(raw: RawRecord) -> StoreResult<ReportRecord> {
        let (provider_id, report_type, month, payload, failure_reason, attempt_count) = raw;
        let month: Month = month
            .parse()
            .map_err(|e| StoreError::corrupt(format!("month '{month}': {e}")))?;
        let payload = payload
            .map(|p| serde_json::from_str::<serde_json::Value>(&p))
            .transpose()?;
        Ok(ReportRecord {
            provider_id,
            report_type,
            month,
            payload,
            failure_reason,
            attempt_count: u32::try_from(attempt_count).unwrap_or(0),
        })
    }

    fn find(conn: &Connection, record: &ReportRecord) -> StoreResult<Option<ReportRecord>> {
        let raw = conn
            .query_row(
                "SELECT provider_id, report_type, month, payload, failure_reason, attempt_count
                 FROM report_records
                 WHERE provider_id = ?1 AND report_type = ?2 AND month = ?3",
                params![record.provider_id, record.report_type, record.month.to_string()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;
        raw.map(Self::decode).transpose()
    }

    /// Number of stored records
    pub fn count(&self) -> StoreResult<usize> {
        let conn = lock(&self.conn)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM report_records", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl ReportStore for SqliteReportStore {
    async fn existing(&self, provider_id: &str, report_type: &str) -> StoreResult<Vec<ReportRecord>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT provider_id, report_type, month, payload, failure_reason, attempt_count
             FROM report_records
             WHERE provider_id = ?1 AND report_type = ?2
             ORDER BY month",
        )?;
        let rows = stmt
            .query_map(params![provider_id, report_type], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<Result<Vec<RawRecord>, _>>()?;

        rows.into_iter().map(Self::decode).collect()
    }

    async fn upsert(&self, record: ReportRecord) -> StoreResult<()> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;

        let existing = Self::find(&tx, &record)?;
        let Some(merged) = record.merge_onto(existing.as_ref()) else {
            return Ok(());
        };

        let payload = merged.payload.as_ref().map(serde_json::to_string).transpose()?;
        tx.execute(
            r#"
                INSERT OR REPLACE INTO report_records
                    (provider_id, report_type, month, payload, failure_reason, attempt_count, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            params![
                merged.provider_id,
                merged.report_type,
                merged.month.to_string(),
                payload,
                merged.failure_reason,
                i64::from(merged.attempt_count),
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}

// ============================================================================
// Trigger Store
// ============================================================================

/// SQLite-backed [`TriggerStore`]
pub struct SqliteTriggerStore {
    conn: Mutex<Connection>,
}

type RawTrigger = (String, String, String, Option<String>);

impl SqliteTriggerStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let store = Self {
            conn: Mutex::new(open_connection(path)?),
        };
        store.create_schema()?;
        tracing::info!(path = %path.display(), "SQLite trigger store initialized");
        Ok(store)
    }

    pub fn in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> StoreResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS periodic_triggers (
                    tenant_id TEXT PRIMARY KEY,
                    interval TEXT NOT NULL,
                    start_at TEXT NOT NULL,
                    last_triggered_at TEXT
                );
                "#,
        )?;
        Ok(())
    }

    fn decode(raw: RawTrigger) -> StoreResult<PeriodicTrigger> {
        let (tenant_id, interval, start_at, last_triggered_at) = raw;
        Ok(PeriodicTrigger {
            interval: interval
                .parse()
                .map_err(|e| StoreError::corrupt(format!("trigger of '{tenant_id}': {e}")))?,
            start_at: parse_timestamp(&start_at)?,
            last_triggered_at: last_triggered_at.as_deref().map(parse_timestamp).transpose()?,
            tenant_id,
        })
    }
}

fn read_trigger(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTrigger> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

#[async_trait]
impl TriggerStore for SqliteTriggerStore {
    async fn get(&self, tenant_id: &str) -> StoreResult<Option<PeriodicTrigger>> {
        let conn = lock(&self.conn)?;
        let raw = conn
            .query_row(
                "SELECT tenant_id, interval, start_at, last_triggered_at
                 FROM periodic_triggers WHERE tenant_id = ?1",
                params![tenant_id],
                read_trigger,
            )
            .optional()?;
        raw.map(Self::decode).transpose()
    }

    async fn put(&self, trigger: &PeriodicTrigger) -> StoreResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute(
            r#"
                INSERT OR REPLACE INTO periodic_triggers (tenant_id, interval, start_at, last_triggered_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            params![
                trigger.tenant_id,
                trigger.interval.as_str(),
                trigger.start_at.to_rfc3339(),
                trigger.last_triggered_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, tenant_id: &str) -> StoreResult<bool> {
        let conn = lock(&self.conn)?;
        let removed = conn.execute(
            "DELETE FROM periodic_triggers WHERE tenant_id = ?1",
            params![tenant_id],
        )?;
        Ok(removed > 0)
    }

    async fn list(&self) -> StoreResult<Vec<PeriodicTrigger>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT tenant_id, interval, start_at, last_triggered_at
             FROM periodic_triggers ORDER BY tenant_id",
        )?;
        let rows = stmt
            .query_map([], read_trigger)?
            .collect::<Result<Vec<RawTrigger>, _>>()?;
        rows.into_iter().map(Self::decode).collect()
    }
}
