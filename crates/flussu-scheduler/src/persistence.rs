//! SQLite-backed persistence for timed calls and session expiry.
//! One connection behind a mutex; the lock is never held across an await.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use flussu_core::{FlussuError, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::record::{NewWorkRecord, WorkRecord, non_empty, offset_minutes, parse_timestamp};
use crate::store::{ClaimOutcome, SessionLookup, WorkStore};

const RECORD_COLUMNS: &str = "seq_id, scheduled_at, delay_minutes, session_ref, workflow_ref, \
                              block_ref, extra_data, enabled, result";

/// SQLite-backed work record store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> FlussuError + '_ {
    move |e| FlussuError::Database(format!("{context}: {e}"))
}

impl SqliteStore {
    /// Open or create the store. Failure here is fatal for a dispatcher run.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err("DB open"))?;
        Self::from_connection(conn)
    }

    /// In-memory store, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("DB open"))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // Overlapping runs on one file wait for each other instead of failing the claim.
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(db_err("Busy timeout"))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| FlussuError::Database(format!("Connection lock poisoned: {e}")))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            -- Scheduled calls fired by the timed-call runner
            CREATE TABLE IF NOT EXISTS timed_calls (
                seq_id INTEGER PRIMARY KEY AUTOINCREMENT,
                scheduled_at TEXT NOT NULL,
                delay_minutes INTEGER NOT NULL DEFAULT 0,
                session_ref TEXT,
                workflow_ref TEXT,
                block_ref TEXT,
                extra_data TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,   -- cleared on claim, never re-set
                result TEXT,                         -- body or ERROR:[code]:reason
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_timed_calls_enabled ON timed_calls(enabled);

            -- Workflow sessions the calls may resume
            CREATE TABLE IF NOT EXISTS sessions (
                session_ref TEXT PRIMARY KEY,
                expires_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
         ",
            )
            .map_err(db_err("Migration"))
    }

    // ─── Producer side ──────────────────────────────────────

    /// Schedule a new call. Returns its sequence id.
    pub fn insert(&self, record: &NewWorkRecord) -> Result<i64> {
        let now = Utc::now();
        let scheduled_at = record.scheduled_at.unwrap_or(now);
        if offset_minutes(scheduled_at, record.delay_minutes).is_none() {
            return Err(FlussuError::Config(format!(
                "delay of {} minutes from {} is out of range",
                record.delay_minutes,
                scheduled_at.to_rfc3339()
            )));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO timed_calls
             (scheduled_at, delay_minutes, session_ref, workflow_ref, block_ref, extra_data,
              enabled, result, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, NULL, ?7)",
            rusqlite::params![
                scheduled_at.to_rfc3339(),
                record.delay_minutes,
                non_empty(record.session_ref.clone()),
                non_empty(record.workflow_ref.clone()),
                non_empty(record.block_ref.clone()),
                non_empty(record.extra_data.clone()),
                now.to_rfc3339(),
            ],
        )
        .map_err(db_err("Insert timed call"))?;
        Ok(conn.last_insert_rowid())
    }

    /// Fetch one record.
    pub fn get(&self, sequence_id: i64) -> Result<Option<WorkRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM timed_calls WHERE seq_id = ?1"),
                [sequence_id],
                RawRecord::from_row,
            )
            .optional()
            .map_err(db_err("Get timed call"))?;
        Ok(raw.and_then(RawRecord::into_record))
    }

    /// Most recent records first.
    pub fn list(&self, limit: usize) -> Result<Vec<WorkRecord>> {
        self.query_records(
            &format!("SELECT {RECORD_COLUMNS} FROM timed_calls ORDER BY seq_id DESC LIMIT ?1"),
            [i64::try_from(limit).unwrap_or(i64::MAX)],
        )
    }

    /// Register or refresh a session's expiry.
    pub fn upsert_session(&self, session_ref: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO sessions (session_ref, expires_at, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(session_ref) DO UPDATE SET expires_at = ?2, updated_at = ?3",
                rusqlite::params![session_ref, expires_at.to_rfc3339(), Utc::now().to_rfc3339()],
            )
            .map_err(db_err("Upsert session"))?;
        Ok(())
    }

    fn query_records<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<WorkRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(db_err("Prepare"))?;
        let rows = stmt
            .query_map(params, RawRecord::from_row)
            .map_err(db_err("Query timed calls"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read timed call row"))?;
        Ok(rows.into_iter().filter_map(RawRecord::into_record).collect())
    }
}

impl WorkStore for SqliteStore {
    fn select_due(&self, only_enabled: bool) -> Result<Vec<WorkRecord>> {
        self.query_records(
            &format!("SELECT {RECORD_COLUMNS} FROM timed_calls WHERE enabled = ?1 ORDER BY seq_id"),
            [only_enabled as i32],
        )
    }

    fn claim(&self, sequence_id: i64) -> Result<ClaimOutcome> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE timed_calls SET enabled = 0 WHERE seq_id = ?1 AND enabled = 1",
                [sequence_id],
            )
            .map_err(db_err("Claim timed call"))?;
        Ok(if changed == 1 {
            ClaimOutcome::Claimed
        } else {
            ClaimOutcome::AlreadyClaimed
        })
    }

    fn record_result(&self, sequence_id: i64, result: &str) -> Result<()> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE timed_calls SET result = ?1 WHERE seq_id = ?2",
                rusqlite::params![result, sequence_id],
            )
            .map_err(db_err("Record result"))?;
        if changed == 0 {
            return Err(FlussuError::NotFound(format!("timed call {sequence_id}")));
        }
        Ok(())
    }
}

impl SessionLookup for SqliteStore {
    fn is_expired(&self, session_ref: &str, now: DateTime<Utc>) -> Result<bool> {
        let expires_at: Option<String> = self
            .lock()?
            .query_row(
                "SELECT expires_at FROM sessions WHERE session_ref = ?1",
                [session_ref],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("Session lookup"))?;
        // Unknown sessions cannot be resumed.
        Ok(match expires_at.as_deref().and_then(parse_timestamp) {
            Some(expires_at) => expires_at <= now,
            None => true,
        })
    }
}

/// Column values as stored, before timestamp parsing.
struct RawRecord {
    sequence_id: i64,
    scheduled_at: String,
    delay_minutes: i64,
    session_ref: Option<String>,
    workflow_ref: Option<String>,
    block_ref: Option<String>,
    extra_data: Option<String>,
    enabled: bool,
    result: Option<String>,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            sequence_id: row.get(0)?,
            scheduled_at: row.get(1)?,
            delay_minutes: row.get(2)?,
            session_ref: row.get(3)?,
            workflow_ref: row.get(4)?,
            block_ref: row.get(5)?,
            extra_data: row.get(6)?,
            enabled: row.get::<_, i32>(7)? != 0,
            result: row.get(8)?,
        })
    }

    fn into_record(self) -> Option<WorkRecord> {
        let Some(scheduled_at) = parse_timestamp(&self.scheduled_at) else {
            tracing::warn!(
                "⚠️ Timed call {} has unreadable scheduled_at '{}', skipping",
                self.sequence_id,
                self.scheduled_at
            );
            return None;
        };
        Some(WorkRecord {
            sequence_id: self.sequence_id,
            scheduled_at,
            delay_minutes: self.delay_minutes,
            session_ref: non_empty(self.session_ref),
            workflow_ref: non_empty(self.workflow_ref),
            block_ref: non_empty(self.block_ref),
            extra_data: non_empty(self.extra_data),
            enabled: self.enabled,
            result: self.result,
        })
    }
}
