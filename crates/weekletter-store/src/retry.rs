use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use weekletter_core::{config::RetryConfig, Period};

use crate::db::{format_ts, init_db, lock, parse_ts};
use crate::error::Result;

const SELECT_COLUMNS: &str = "SELECT subject, week, year, attempts, last_attempt, next_attempt,
        max_attempts, exhausted
     FROM retry_attempts";

/// How often to retry and how many failures to tolerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            interval: cfg.interval(),
            max_attempts: cfg.max_attempts(),
        }
    }
}

/// Failed-fetch bookkeeping for one (subject, period).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryRecord {
    pub subject: String,
    pub period: Period,
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
    pub next_attempt: DateTime<Utc>,
    pub max_attempts: u32,
    /// Set once a failure arrives after the attempt bound was reached.
    pub exhausted: bool,
}

impl RetryRecord {
    /// Whether the sweep should try this period again at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.exhausted && self.next_attempt <= now
    }
}

/// What [`RetryTracker::record_failure`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// No record existed; one was created with one attempt. Callers announce
    /// the retry plan on this outcome only.
    FirstFailure(RetryRecord),
    /// Attempt count incremented and the next attempt pushed out.
    Retrying(RetryRecord),
    /// The bound was already reached; the record is now flagged exhausted.
    Exhausted(RetryRecord),
    /// The record was flagged exhausted earlier. Nothing changed.
    AlreadyExhausted(RetryRecord),
}

impl FailureOutcome {
    pub fn record(&self) -> &RetryRecord {
        match self {
            FailureOutcome::FirstFailure(r)
            | FailureOutcome::Retrying(r)
            | FailureOutcome::Exhausted(r)
            | FailureOutcome::AlreadyExhausted(r) => r,
        }
    }

    pub fn is_first_attempt(&self) -> bool {
        matches!(self, FailureOutcome::FirstFailure(_))
    }
}

/// Retry Tracker: persisted attempt counters that survive restarts.
pub struct RetryTracker {
    db: Mutex<Connection>,
    policy: RetryPolicy,
}

impl RetryTracker {
    pub fn new(conn: Connection, policy: RetryPolicy) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            policy,
        })
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn record_failure(&self, subject: &str, period: Period) -> Result<FailureOutcome> {
        self.record_failure_at(subject, period, Utc::now())
    }

    /// [`record_failure`](Self::record_failure) with an explicit clock.
    pub fn record_failure_at(
        &self,
        subject: &str,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome> {
        let mut db = lock(&self.db)?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let next = now + self.policy.interval;

        let outcome = match fetch(&tx, subject, period)? {
            None => {
                tx.execute(
                    "INSERT INTO retry_attempts
                     (subject, week, year, attempts, last_attempt, next_attempt, max_attempts, exhausted)
                     VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, 0)",
                    rusqlite::params![
                        subject,
                        period.week,
                        period.year,
                        format_ts(now),
                        format_ts(next),
                        self.policy.max_attempts
                    ],
                )?;
                FailureOutcome::FirstFailure(RetryRecord {
                    subject: subject.to_string(),
                    period,
                    attempts: 1,
                    last_attempt: now,
                    next_attempt: next,
                    max_attempts: self.policy.max_attempts,
                    exhausted: false,
                })
            }
            Some(record) if record.exhausted => FailureOutcome::AlreadyExhausted(record),
            Some(mut record) if record.attempts >= record.max_attempts => {
                tx.execute(
                    "UPDATE retry_attempts SET exhausted = 1, last_attempt = ?4, next_attempt = ?4
                     WHERE subject = ?1 AND week = ?2 AND year = ?3",
                    rusqlite::params![subject, period.week, period.year, format_ts(now)],
                )?;
                record.exhausted = true;
                record.last_attempt = now;
                record.next_attempt = now;
                warn!(subject, %period, attempts = record.attempts, "fetch retries exhausted");
                FailureOutcome::Exhausted(record)
            }
            Some(mut record) => {
                record.attempts += 1;
                record.last_attempt = now;
                record.next_attempt = next;
                tx.execute(
                    "UPDATE retry_attempts SET attempts = ?4, last_attempt = ?5, next_attempt = ?6
                     WHERE subject = ?1 AND week = ?2 AND year = ?3",
                    rusqlite::params![
                        subject,
                        period.week,
                        period.year,
                        record.attempts,
                        format_ts(now),
                        format_ts(next)
                    ],
                )?;
                FailureOutcome::Retrying(record)
            }
        };
        tx.commit()?;

        if outcome.is_first_attempt() {
            info!(subject, %period, next_attempt = %next, "first fetch failure recorded");
        }
        Ok(outcome)
    }

    /// Forget the record for (subject, period). No history is kept.
    pub fn record_success(&self, subject: &str, period: Period) -> Result<()> {
        if self.clear(subject, period)? {
            info!(subject, %period, "fetch recovered, retry record cleared");
        }
        Ok(())
    }

    /// Delete the record; used for manual clearing of an exhausted period.
    /// Returns whether a record existed.
    pub fn clear(&self, subject: &str, period: Period) -> Result<bool> {
        let db = lock(&self.db)?;
        let n = db.execute(
            "DELETE FROM retry_attempts WHERE subject = ?1 AND week = ?2 AND year = ?3",
            rusqlite::params![subject, period.week, period.year],
        )?;
        Ok(n > 0)
    }

    /// Attempt count, 0 when no record exists.
    pub fn attempts(&self, subject: &str, period: Period) -> Result<u32> {
        Ok(self.get(subject, period)?.map_or(0, |r| r.attempts))
    }

    pub fn get(&self, subject: &str, period: Period) -> Result<Option<RetryRecord>> {
        let db = lock(&self.db)?;
        fetch(&db, subject, period)
    }

    /// Non-exhausted records whose next attempt has arrived, oldest first.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<RetryRecord>> {
        let db = lock(&self.db)?;
        let mut stmt = db.prepare(&format!(
            "{SELECT_COLUMNS} WHERE exhausted = 0 AND next_attempt <= ?1 ORDER BY next_attempt"
        ))?;
        let rows = stmt.query_map([format_ts(now)], row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn list(&self) -> Result<Vec<RetryRecord>> {
        let db = lock(&self.db)?;
        let mut stmt = db.prepare(&format!("{SELECT_COLUMNS} ORDER BY subject, year, week"))?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn fetch(conn: &Connection, subject: &str, period: Period) -> Result<Option<RetryRecord>> {
    let record = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE subject = ?1 AND week = ?2 AND year = ?3"),
            rusqlite::params![subject, period.week, period.year],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RetryRecord> {
    let last: String = row.get(4)?;
    let next: String = row.get(5)?;
    Ok(RetryRecord {
        subject: row.get(0)?,
        period: Period {
            week: row.get(1)?,
            year: row.get(2)?,
        },
        attempts: row.get(3)?,
        last_attempt: parse_ts(4, &last)?,
        next_attempt: parse_ts(5, &next)?,
        max_attempts: row.get(6)?,
        exhausted: row.get(7)?,
    })
}
