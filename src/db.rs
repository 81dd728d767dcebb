// 🗄️ Storage layer - SQLite + WAL
//
// Every operation opens its own connection and every multi-statement change
// runs inside a BEGIN IMMEDIATE transaction, so coin balances and reveal
// records are serialized by SQLite itself. Several server processes may share
// one database file.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{ffi, Connection, ErrorCode, Row, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// How long a writer waits for a competing writer before failing
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL lets readers proceed while a reveal transaction holds the write lock
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
        row.get::<_, String>(0)
    })?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Accounts (coin balance lives here, never negative)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY NOT NULL,
            display_name TEXT NOT NULL,
            department TEXT NOT NULL DEFAULT '',
            instagram_id TEXT NOT NULL DEFAULT '',
            photo_url TEXT,
            interests TEXT NOT NULL DEFAULT '[]',
            coins INTEGER NOT NULL CHECK (coins >= 0),
            last_replenished_at TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('MEMBER', 'ADMIN')),
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Matching cards (UNIQUE author_id = one live card per author)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS matching_cards (
            id TEXT PRIMARY KEY NOT NULL,
            author_id TEXT NOT NULL UNIQUE REFERENCES accounts(id),
            description TEXT NOT NULL,
            match_type TEXT NOT NULL CHECK (match_type IN ('PAIR', 'TRIO')),
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Reveal records (UNIQUE pair = optimistic fence against double reveal)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS reveal_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            viewer_id TEXT NOT NULL REFERENCES accounts(id),
            card_id TEXT NOT NULL REFERENCES matching_cards(id),
            created_at TEXT NOT NULL,
            UNIQUE (viewer_id, card_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Notification outbox
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY NOT NULL,
            recipient_id TEXT NOT NULL REFERENCES accounts(id),
            message TEXT NOT NULL,
            read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reveal_card ON reveal_records(card_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cards_created ON matching_cards(created_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_recipient
         ON notifications(recipient_id, created_at)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// STORE
// ============================================================================

/// Handle to the shared database file. Cheap to clone; holds no connection.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Store {
    /// Open (and create or upgrade) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Store {
            path: path.as_ref().to_path_buf(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        };
        let conn = store.connect()?;
        setup_database(&conn)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fresh connection with foreign keys enforced
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    /// Run read-only queries on a fresh connection
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    /// Run `f` inside one IMMEDIATE transaction.
    ///
    /// Commits only when `f` returns `Ok`; any error drops the transaction,
    /// which rolls back every write made so far.
    pub fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// True when `err` is a UNIQUE / PRIMARY KEY violation
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

/// `dt` at the precision the database keeps (microseconds).
///
/// Every timestamp handed back to a caller goes through here first, so the
/// returned value and the stored row compare equal.
pub fn storage_time(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(6)
}

/// Fixed-width RFC 3339 (microseconds, `Z`) so text order equals time order
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Shared fixture for module tests: a file-backed store in a temp dir
#[cfg(test)]
pub(crate) fn test_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("test.db")).unwrap();
    (dir, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_setup_is_idempotent() {
        let (_dir, store) = test_store();
        let conn = store.connect().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('accounts', 'matching_cards', 'reveal_records', 'notifications')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn test_write_rolls_back_on_error() {
        let (_dir, store) = test_store();
        let now = format_timestamp(&Utc::now());

        let result: Result<()> = store.write(|tx| {
            tx.execute(
                "INSERT INTO accounts (id, display_name, coins, last_replenished_at, role, created_at)
                 VALUES ('a', 'A', 2, ?1, 'MEMBER', ?1)",
                [&now],
            )?;
            Err(crate::error::LedgerError::Internal("abort".into()))
        });
        assert!(result.is_err());

        let count: i64 = store
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM accounts", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_negative_coins_rejected_by_schema() {
        let (_dir, store) = test_store();
        let now = format_timestamp(&Utc::now());

        let err = store
            .write(|tx| {
                tx.execute(
                    "INSERT INTO accounts (id, display_name, coins, last_replenished_at, role, created_at)
                     VALUES ('a', 'A', -1, ?1, 'MEMBER', ?1)",
                    [&now],
                )?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, crate::error::LedgerError::Storage(_)));
    }

    #[test]
    fn test_timestamp_format_sorts_lexically() {
        let a = Utc.with_ymd_and_hms(2025, 1, 9, 23, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2025, 1, 10, 1, 0, 0).unwrap();
        assert!(format_timestamp(&a) < format_timestamp(&b));
        assert_eq!(format_timestamp(&a), "2025-01-09T23:00:00.000000Z");
    }
}
