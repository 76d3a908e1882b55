use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// One row per named job; the name is the primary key so registering the
/// same job on every startup is an upsert.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            name        TEXT    NOT NULL PRIMARY KEY,
            cron        TEXT    NOT NULL,   -- 6-field cron, seconds first, UTC
            enabled     INTEGER NOT NULL DEFAULT 1,
            status      TEXT    NOT NULL DEFAULT 'idle',
            last_run    TEXT,               -- RFC 3339 or NULL
            next_run    TEXT    NOT NULL,   -- RFC 3339
            run_count   INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_jobs_next_run ON jobs (next_run);
        ",
    )?;
    Ok(())
}
