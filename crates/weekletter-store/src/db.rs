use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{types::Type, Connection};

use crate::error::{Result, StoreError};

/// Initialise the store tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_documents_table(conn)?;
    create_retry_attempts_table(conn)?;
    create_reminders_table(conn)?;
    Ok(())
}

/// One row per (subject, week, year); re-fetches upsert in place.
fn create_documents_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS documents (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            subject         TEXT    NOT NULL,
            week            INTEGER NOT NULL,
            year            INTEGER NOT NULL,
            content         TEXT    NOT NULL,
            content_hash    TEXT    NOT NULL,
            posted          TEXT    NOT NULL DEFAULT '{}',   -- JSON map sink -> bool
            auto_extracted  INTEGER NOT NULL DEFAULT 0,
            extracted_hash  TEXT,
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL,
            UNIQUE(subject, week, year)
        );",
    )?;
    Ok(())
}

fn create_retry_attempts_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS retry_attempts (
            subject       TEXT    NOT NULL,
            week          INTEGER NOT NULL,
            year          INTEGER NOT NULL,
            attempts      INTEGER NOT NULL,
            last_attempt  TEXT    NOT NULL,
            next_attempt  TEXT    NOT NULL,
            max_attempts  INTEGER NOT NULL,
            exhausted     INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (subject, week, year)
        );
        -- Sweep query: WHERE exhausted = 0 AND next_attempt <= ?
        CREATE INDEX IF NOT EXISTS idx_retry_next_attempt
            ON retry_attempts(exhausted, next_attempt);",
    )?;
    Ok(())
}

fn create_reminders_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS reminders (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            text         TEXT    NOT NULL,
            date         TEXT    NOT NULL,   -- YYYY-MM-DD, local
            time         TEXT    NOT NULL,   -- HH:MM:SS, local
            subject      TEXT,
            sent         INTEGER NOT NULL DEFAULT 0,
            source       TEXT    NOT NULL DEFAULT 'manual',
            document_id  INTEGER,
            event_kind   TEXT,
            confidence   REAL,
            created_at   TEXT    NOT NULL,
            sent_at      TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_reminders_pending
            ON reminders(sent, date, time);
        CREATE INDEX IF NOT EXISTS idx_reminders_document
            ON reminders(document_id);",
    )?;
    Ok(())
}

/// Fixed-width UTC timestamp so lexical order in SQL matches time order.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored timestamp inside a row mapper.
pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Acquire a store connection, mapping lock poisoning to [`StoreError`].
pub(crate) fn lock(db: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    db.lock().map_err(|_| StoreError::LockPoisoned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }

    #[test]
    fn timestamps_sort_lexically() {
        let a = Utc::now();
        let b = a + chrono::Duration::milliseconds(1500);
        assert!(format_ts(a) < format_ts(b));
        assert!(format_ts(a).ends_with('Z'));
    }
}
