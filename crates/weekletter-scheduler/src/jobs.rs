use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    schedule::next_after,
    types::{JobStatus, ScheduledJob},
};

const SELECT_COLUMNS: &str = "SELECT name, cron, enabled, status, last_run, next_run, run_count,
        created_at, updated_at
     FROM jobs";

/// Persisted job table.
///
/// Uses its own `Connection` so the CLI can inspect and toggle jobs while
/// the engine loop runs.
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Register `name` with `cron`.
    ///
    /// A new job gets its first occurrence after `now`. An existing job keeps
    /// its state unless the cron expression changed, in which case it is
    /// rescheduled from `now`.
    pub fn upsert_job(&self, name: &str, cron: &str, now: DateTime<Utc>) -> Result<ScheduledJob> {
        let next = next_after(cron, now)?;
        let conn = self.lock()?;
        let existing = fetch(&conn, name)?;
        match existing {
            Some(job) if job.cron == cron => return Ok(job),
            Some(_) => {
                conn.execute(
                    "UPDATE jobs SET cron = ?2, next_run = ?3, updated_at = ?4 WHERE name = ?1",
                    rusqlite::params![name, cron, format_ts(next), format_ts(now)],
                )?;
                info!(job = %name, %cron, "job schedule changed");
            }
            None => {
                conn.execute(
                    "INSERT INTO jobs (name, cron, enabled, status, last_run, next_run,
                                       run_count, created_at, updated_at)
                     VALUES (?1, ?2, 1, 'idle', NULL, ?3, 0, ?4, ?4)",
                    rusqlite::params![name, cron, format_ts(next), format_ts(now)],
                )?;
                info!(job = %name, %cron, next_run = %next, "job registered");
            }
        }
        fetch(&conn, name)?.ok_or_else(|| not_found(name))
    }

    pub fn get(&self, name: &str) -> Result<Option<ScheduledJob>> {
        let conn = self.lock()?;
        fetch(&conn, name)
    }

    /// All jobs ordered by name.
    pub fn list(&self) -> Result<Vec<ScheduledJob>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY name"))?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Claim an idle job for execution. Returns false if another tick holds it.
    pub fn mark_running(&self, name: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE jobs SET status = 'running', updated_at = ?2
             WHERE name = ?1 AND status = 'idle'",
            rusqlite::params![name, format_ts(now)],
        )?;
        Ok(n > 0)
    }

    /// Record a finished run and schedule the next occurrence after `ran_at`.
    pub fn record_run(&self, name: &str, ran_at: DateTime<Utc>) -> Result<ScheduledJob> {
        let conn = self.lock()?;
        let job = fetch(&conn, name)?.ok_or_else(|| not_found(name))?;
        let next = next_after(&job.cron, ran_at)?;
        conn.execute(
            "UPDATE jobs SET status = 'idle', last_run = ?2, next_run = ?3,
                             run_count = run_count + 1, updated_at = ?4
             WHERE name = ?1",
            rusqlite::params![name, format_ts(ran_at), format_ts(next), format_ts(Utc::now())],
        )?;
        fetch(&conn, name)?.ok_or_else(|| not_found(name))
    }

    /// Move `next_run` to the first occurrence after `now` without running.
    pub fn reschedule(&self, name: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let conn = self.lock()?;
        let job = fetch(&conn, name)?.ok_or_else(|| not_found(name))?;
        let next = next_after(&job.cron, now)?;
        conn.execute(
            "UPDATE jobs SET next_run = ?2, updated_at = ?3 WHERE name = ?1",
            rusqlite::params![name, format_ts(next), format_ts(now)],
        )?;
        Ok(next)
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE jobs SET enabled = ?2, updated_at = ?3 WHERE name = ?1",
            rusqlite::params![name, enabled, format_ts(Utc::now())],
        )?;
        if n == 0 {
            return Err(not_found(name));
        }
        info!(job = %name, enabled, "job toggled");
        Ok(())
    }

    /// Startup recovery: release jobs left running by a crash and advance
    /// every `next_run` that is already in the past. Returns how many jobs
    /// were advanced.
    pub fn recover(&self, now: DateTime<Utc>) -> Result<usize> {
        let jobs = self.list()?;
        {
            let conn = self.lock()?;
            let released = conn.execute(
                "UPDATE jobs SET status = 'idle', updated_at = ?1 WHERE status = 'running'",
                [format_ts(now)],
            )?;
            if released > 0 {
                warn!(count = released, "jobs left running by a previous process released");
            }
        }

        let mut advanced = 0;
        for job in jobs.into_iter().filter(|j| j.next_run < now) {
            let next = self.reschedule(&job.name, now)?;
            warn!(job = %job.name, stale = %job.next_run, %next, "stale job advanced");
            advanced += 1;
        }
        Ok(advanced)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SchedulerError::LockPoisoned)
    }
}

fn fetch(conn: &Connection, name: &str) -> Result<Option<ScheduledJob>> {
    let job = conn
        .query_row(&format!("{SELECT_COLUMNS} WHERE name = ?1"), [name], row_to_job)
        .optional()?;
    Ok(job)
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledJob> {
    let status: String = row.get(3)?;
    let last_run: Option<String> = row.get(4)?;
    Ok(ScheduledJob {
        name: row.get(0)?,
        cron: row.get(1)?,
        enabled: row.get(2)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into())
        })?,
        last_run: last_run.as_deref().map(|s| parse_ts(4, s)).transpose()?,
        next_run: parse_ts(5, &row.get::<_, String>(5)?)?,
        run_count: row.get(6)?,
        created_at: parse_ts(7, &row.get::<_, String>(7)?)?,
        updated_at: parse_ts(8, &row.get::<_, String>(8)?)?,
    })
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn not_found(name: &str) -> SchedulerError {
    SchedulerError::JobNotFound {
        name: name.to_string(),
    }
}
