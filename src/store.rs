//! Data Store interface for the entities the background core touches.
//!
//! The host application owns durable storage for users, reports, and
//! notifications; this module defines the narrow bulk read/write surface the
//! core consumes ([`DataStore`]) plus a SQLite reference implementation
//! ([`SqliteStore`]) used by the bundled server binary and the test suite.
//!
//! All timestamps are unix seconds.  The suspension invariant is enforced at
//! this boundary: `set_users_suspended` and `set_users_active` always write
//! `status` and `suspended_at` together.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Local, TimeZone};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    NotFound(String),
    Invalid(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            StoreError::NotFound(msg) => write!(f, "not found: {msg}"),
            StoreError::Invalid(msg) => write!(f, "invalid: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

// ---------------------------------------------------------------------------
// Entity types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "ACTIVE",
            UserStatus::Suspended => "SUSPENDED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "ACTIVE" => Ok(UserStatus::Active),
            "SUSPENDED" => Ok(UserStatus::Suspended),
            other => Err(StoreError::Invalid(format!("user status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "PENDING",
            ReportStatus::Approved => "APPROVED",
            ReportStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "PENDING" => Ok(ReportStatus::Pending),
            "APPROVED" => Ok(ReportStatus::Approved),
            "REJECTED" => Ok(ReportStatus::Rejected),
            other => Err(StoreError::Invalid(format!("report status: {other}"))),
        }
    }
}

/// User row as seen by the core.  `suspended_at` non-null implies
/// `status == Suspended` when written by this crate, but readers must
/// tolerate disagreement written by other code paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub status: UserStatus,
    pub suspended_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub student_id: String,
    pub status: ReportStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: String,
    pub kind: String,
    pub content: String,
    pub created_at: i64,
    pub read_at: Option<i64>,
}

// ---------------------------------------------------------------------------
// DataStore trait
// ---------------------------------------------------------------------------

/// Bulk entity read/write operations the background core needs.
///
/// Implementations must be safe to call from concurrently running sweep
/// tasks and request handlers.  Single-row read-modify-write atomicity is
/// the implementation's responsibility; none of the bulk sweeps require
/// multi-row transactions.
pub trait DataStore: Send + Sync {
    fn user(&self, id: &str) -> Result<Option<User>, StoreError>;
    fn all_users(&self) -> Result<Vec<User>, StoreError>;
    fn active_users(&self) -> Result<Vec<User>, StoreError>;

    /// Distinct student ids owning a report with `start <= created_at < end`.
    fn student_ids_with_report_between(
        &self,
        start: i64,
        end: i64,
    ) -> Result<HashSet<String>, StoreError>;

    /// Distinct student ids owning a PENDING report with `created_at < cutoff`.
    fn student_ids_with_pending_report_before(
        &self,
        cutoff: i64,
    ) -> Result<HashSet<String>, StoreError>;

    /// Set status=ACTIVE and suspended_at=NULL for every listed user.
    /// Returns the number of rows changed.
    fn set_users_active(&self, ids: &[String]) -> Result<usize, StoreError>;

    /// Set status=SUSPENDED and suspended_at=`at` for every listed user.
    /// Returns the number of rows changed.
    fn set_users_suspended(&self, ids: &[String], at: i64) -> Result<usize, StoreError>;

    fn create_notification(
        &self,
        recipient_id: &str,
        kind: &str,
        content: &str,
        at: i64,
    ) -> Result<Notification, StoreError>;

    fn notifications_for(&self, recipient_id: &str) -> Result<Vec<Notification>, StoreError>;

    /// Reports created by `student_id` with `start <= created_at < end`.
    fn count_reports_between(
        &self,
        student_id: &str,
        start: i64,
        end: i64,
    ) -> Result<u32, StoreError>;

    fn create_report(&self, student_id: &str, at: i64) -> Result<Report, StoreError>;
}

/// Boundaries of the local calendar day containing `now`, as
/// `[start, end)` unix seconds.
pub fn local_day_bounds(now: DateTime<Local>) -> (i64, i64) {
    let date = now.date_naive();
    let start = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    let start_ts = Local
        .from_local_datetime(&start)
        .earliest()
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| now.timestamp() - now.timestamp().rem_euclid(86_400));
    (start_ts, start_ts + 86_400)
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY,
    status       TEXT NOT NULL DEFAULT 'ACTIVE',
    suspended_at INTEGER
);
CREATE TABLE IF NOT EXISTS reports (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id TEXT NOT NULL REFERENCES users(id),
    status     TEXT NOT NULL DEFAULT 'PENDING',
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS notifications (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    recipient_id TEXT NOT NULL REFERENCES users(id),
    kind         TEXT NOT NULL,
    content      TEXT NOT NULL,
    created_at   INTEGER NOT NULL,
    read_at      INTEGER
);
CREATE INDEX IF NOT EXISTS idx_reports_student_created
    ON reports(student_id, created_at);
CREATE INDEX IF NOT EXISTS idx_reports_status_created
    ON reports(status, created_at);
";

/// SQLite-backed [`DataStore`].  The connection is serialized behind a
/// mutex; every operation is a single statement or an implicit transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests and throwaway setups.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a user row.  Host-app concern; exposed for wiring and tests.
    pub fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO users (id, status, suspended_at) VALUES (?1, ?2, ?3)",
            params![user.id, user.status.as_str(), user.suspended_at],
        )?;
        Ok(())
    }

    /// Insert a report row with an explicit status, for test fixtures.
    pub fn insert_report(
        &self,
        student_id: &str,
        status: ReportStatus,
        created_at: i64,
    ) -> Result<i64, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO reports (student_id, status, created_at) VALUES (?1, ?2, ?3)",
            params![student_id, status.as_str(), created_at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // Lock poisoning only happens if a holder panicked; propagating the
        // inner guard keeps the store usable for the remaining callers.
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, Option<i64>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn users_from_rows(
    rows: Vec<(String, String, Option<i64>)>,
) -> Result<Vec<User>, StoreError> {
    rows.into_iter()
        .map(|(id, status, suspended_at)| {
            Ok(User {
                id,
                status: UserStatus::parse(&status)?,
                suspended_at,
            })
        })
        .collect()
}

impl DataStore for SqliteStore {
    fn user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, status, suspended_at FROM users WHERE id = ?1",
                params![id],
                row_to_user,
            )
            .optional()?;
        match row {
            Some((id, status, suspended_at)) => Ok(Some(User {
                id,
                status: UserStatus::parse(&status)?,
                suspended_at,
            })),
            None => Ok(None),
        }
    }

    fn all_users(&self) -> Result<Vec<User>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id, status, suspended_at FROM users")?;
        let rows = stmt
            .query_map([], row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        users_from_rows(rows)
    }

    fn active_users(&self) -> Result<Vec<User>, StoreError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT id, status, suspended_at FROM users WHERE status = 'ACTIVE'")?;
        let rows = stmt
            .query_map([], row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        users_from_rows(rows)
    }

    fn student_ids_with_report_between(
        &self,
        start: i64,
        end: i64,
    ) -> Result<HashSet<String>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT student_id FROM reports
             WHERE created_at >= ?1 AND created_at < ?2",
        )?;
        let ids = stmt
            .query_map(params![start, end], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    fn student_ids_with_pending_report_before(
        &self,
        cutoff: i64,
    ) -> Result<HashSet<String>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT student_id FROM reports
             WHERE status = 'PENDING' AND created_at < ?1",
        )?;
        let ids = stmt
            .query_map(params![cutoff], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    fn set_users_active(&self, ids: &[String]) -> Result<usize, StoreError> {
        let conn = self.lock();
        let mut changed = 0;
        for id in ids {
            changed += conn.execute(
                "UPDATE users SET status = 'ACTIVE', suspended_at = NULL WHERE id = ?1",
                params![id],
            )?;
        }
        Ok(changed)
    }

    fn set_users_suspended(&self, ids: &[String], at: i64) -> Result<usize, StoreError> {
        let conn = self.lock();
        let mut changed = 0;
        for id in ids {
            changed += conn.execute(
                "UPDATE users SET status = 'SUSPENDED', suspended_at = ?2 WHERE id = ?1",
                params![id, at],
            )?;
        }
        Ok(changed)
    }

    fn create_notification(
        &self,
        recipient_id: &str,
        kind: &str,
        content: &str,
        at: i64,
    ) -> Result<Notification, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO notifications (recipient_id, kind, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![recipient_id, kind, content, at],
        )?;
        Ok(Notification {
            id: conn.last_insert_rowid(),
            recipient_id: recipient_id.to_string(),
            kind: kind.to_string(),
            content: content.to_string(),
            created_at: at,
            read_at: None,
        })
    }

    fn notifications_for(&self, recipient_id: &str) -> Result<Vec<Notification>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, recipient_id, kind, content, created_at, read_at
             FROM notifications WHERE recipient_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![recipient_id], |row| {
                Ok(Notification {
                    id: row.get(0)?,
                    recipient_id: row.get(1)?,
                    kind: row.get(2)?,
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                    read_at: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn count_reports_between(
        &self,
        student_id: &str,
        start: i64,
        end: i64,
    ) -> Result<u32, StoreError> {
        let conn = self.lock();
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM reports
             WHERE student_id = ?1 AND created_at >= ?2 AND created_at < ?3",
            params![student_id, start, end],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn create_report(&self, student_id: &str, at: i64) -> Result<Report, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO reports (student_id, status, created_at) VALUES (?1, 'PENDING', ?2)",
            params![student_id, at],
        )?;
        Ok(Report {
            id: conn.last_insert_rowid(),
            student_id: student_id.to_string(),
            status: ReportStatus::Pending,
            created_at: at,
        })
    }
}
