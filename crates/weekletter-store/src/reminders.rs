use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::{format_ts, init_db, lock, parse_ts};
use crate::error::{Result, StoreError};

const SELECT_COLUMNS: &str = "SELECT id, text, date, time, subject, sent, source, document_id,
        event_kind, confidence, created_at
     FROM reminders";
const DATE_FMT: &str = "%Y-%m-%d";
const TIME_FMT: &str = "%H:%M:%S";

/// Who created a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderSource {
    /// Created on explicit user request.
    Manual,
    /// Derived from a week letter by the extraction service.
    AutoExtracted,
}

impl fmt::Display for ReminderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReminderSource::Manual => "manual",
            ReminderSource::AutoExtracted => "auto_extracted",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ReminderSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "manual" => Ok(ReminderSource::Manual),
            "auto_extracted" => Ok(ReminderSource::AutoExtracted),
            other => Err(format!("unknown reminder source: {other}")),
        }
    }
}

/// Classification of an event found in a week letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Deadline,
    #[serde(alias = "permission-form")]
    PermissionForm,
    Event,
    #[serde(alias = "supply-needed")]
    SupplyNeeded,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Deadline => "deadline",
            EventKind::PermissionForm => "permission_form",
            EventKind::Event => "event",
            EventKind::SupplyNeeded => "supply_needed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "deadline" => Ok(EventKind::Deadline),
            "permission_form" => Ok(EventKind::PermissionForm),
            "event" => Ok(EventKind::Event),
            "supply_needed" => Ok(EventKind::SupplyNeeded),
            other => Err(format!("unknown event kind: {other}")),
        }
    }
}

/// A persisted reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub text: String,
    /// Local calendar date the reminder fires on.
    pub date: NaiveDate,
    /// Local wall-clock time the reminder fires at.
    pub time: NaiveTime,
    pub subject: Option<String>,
    /// Flips false → true once; a sent reminder is never delivered again.
    pub sent: bool,
    pub source: ReminderSource,
    /// Week letter the reminder was extracted from.
    pub document_id: Option<i64>,
    pub event_kind: Option<EventKind>,
    /// Extraction confidence in [0, 1]; only set for auto-extracted rows.
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Reminder {
    pub fn due_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }
}

/// Fields for a reminder that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReminder {
    pub text: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub subject: Option<String>,
    pub event_kind: Option<EventKind>,
    pub confidence: Option<f64>,
}

impl NewReminder {
    pub fn manual(text: &str, date: NaiveDate, time: NaiveTime, subject: Option<&str>) -> Self {
        Self {
            text: text.to_string(),
            date,
            time,
            subject: subject.map(String::from),
            event_kind: None,
            confidence: None,
        }
    }

    fn key(&self) -> (String, NaiveDate, NaiveTime) {
        (self.text.clone(), self.date, self.time)
    }
}

/// Reminder Store.
pub struct ReminderStore {
    db: Mutex<Connection>,
}

impl ReminderStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Store a user-requested reminder.
    pub fn add_manual(&self, new: &NewReminder) -> Result<Reminder> {
        let db = lock(&self.db)?;
        let id = insert(&db, new, ReminderSource::Manual, None, false)?;
        info!(reminder_id = id, date = %new.date, time = %new.time, "manual reminder added");
        fetch(&db, id)?.ok_or_else(|| not_found(id))
    }

    pub fn get(&self, id: i64) -> Result<Option<Reminder>> {
        let db = lock(&self.db)?;
        fetch(&db, id)
    }

    /// Reminders ordered by target date and time. `subject` filters when set.
    pub fn list(&self, subject: Option<&str>, include_sent: bool) -> Result<Vec<Reminder>> {
        let db = lock(&self.db)?;
        let mut stmt = db.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE (?1 IS NULL OR subject = ?1) AND (?2 = 1 OR sent = 0)
             ORDER BY date, time, id"
        ))?;
        let rows = stmt.query_map(rusqlite::params![subject, include_sent], row_to_reminder)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Unsent reminders whose target is at or before `now`, oldest first.
    pub fn due(&self, now: NaiveDateTime) -> Result<Vec<Reminder>> {
        let date = now.date().format(DATE_FMT).to_string();
        let time = now.time().format(TIME_FMT).to_string();
        let db = lock(&self.db)?;
        let mut stmt = db.prepare_cached(&format!(
            "{SELECT_COLUMNS}
             WHERE sent = 0 AND (date < ?1 OR (date = ?1 AND time <= ?2))
             ORDER BY date, time, id"
        ))?;
        let rows = stmt.query_map(rusqlite::params![date, time], row_to_reminder)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Claim a reminder for delivery.
    ///
    /// Conditional on `sent = 0`, so of any number of concurrent callers
    /// exactly one sees `true`.
    pub fn mark_sent(&self, id: i64) -> Result<bool> {
        let db = lock(&self.db)?;
        let n = db.execute(
            "UPDATE reminders SET sent = 1, sent_at = ?2 WHERE id = ?1 AND sent = 0",
            rusqlite::params![id, format_ts(Utc::now())],
        )?;
        Ok(n > 0)
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let db = lock(&self.db)?;
        let n = db.execute("DELETE FROM reminders WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(not_found(id));
        }
        info!(reminder_id = id, "reminder deleted");
        Ok(())
    }

    pub fn auto_extracted_for(&self, document_id: i64) -> Result<Vec<Reminder>> {
        let db = lock(&self.db)?;
        let mut stmt = db.prepare(&format!(
            "{SELECT_COLUMNS} WHERE document_id = ?1 AND source = 'auto_extracted'
             ORDER BY date, time, id"
        ))?;
        let rows = stmt.query_map([document_id], row_to_reminder)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Swap the auto-extracted reminders of `document_id` for `items` in one
    /// transaction.
    ///
    /// A new item identical (text, date, time) to a superseded reminder that
    /// was already sent is stored as sent, so re-extraction never re-delivers.
    pub fn replace_auto_extracted(
        &self,
        document_id: i64,
        items: &[NewReminder],
    ) -> Result<Vec<Reminder>> {
        let mut db = lock(&self.db)?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let already_sent: HashSet<(String, NaiveDate, NaiveTime)> = {
            let mut stmt = tx.prepare(&format!(
                "{SELECT_COLUMNS} WHERE document_id = ?1 AND source = 'auto_extracted' AND sent = 1"
            ))?;
            let rows = stmt.query_map([document_id], row_to_reminder)?;
            rows.map(|r| r.map(|r| (r.text, r.date, r.time)))
                .collect::<rusqlite::Result<_>>()?
        };

        let removed = tx.execute(
            "DELETE FROM reminders WHERE document_id = ?1 AND source = 'auto_extracted'",
            [document_id],
        )?;

        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let sent = already_sent.contains(&item.key());
            ids.push(insert(
                &tx,
                item,
                ReminderSource::AutoExtracted,
                Some(document_id),
                sent,
            )?);
        }

        let mut stored = Vec::with_capacity(ids.len());
        for id in ids {
            stored.push(fetch(&tx, id)?.ok_or_else(|| not_found(id))?);
        }
        tx.commit()?;

        debug!(document_id, removed, inserted = stored.len(), "auto-extracted reminders replaced");
        Ok(stored)
    }

    pub fn count(&self) -> Result<i64> {
        let db = lock(&self.db)?;
        Ok(db.query_row("SELECT COUNT(*) FROM reminders", [], |row| row.get(0))?)
    }
}

fn insert(
    conn: &Connection,
    new: &NewReminder,
    source: ReminderSource,
    document_id: Option<i64>,
    sent: bool,
) -> Result<i64> {
    let confidence = match source {
        ReminderSource::Manual => None,
        ReminderSource::AutoExtracted => new.confidence,
    };
    conn.execute(
        "INSERT INTO reminders
         (text, date, time, subject, sent, source, document_id, event_kind, confidence, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            new.text,
            new.date.format(DATE_FMT).to_string(),
            new.time.format(TIME_FMT).to_string(),
            new.subject,
            sent,
            source.to_string(),
            document_id,
            new.event_kind.map(|k| k.to_string()),
            confidence,
            format_ts(Utc::now()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn fetch(conn: &Connection, id: i64) -> Result<Option<Reminder>> {
    let reminder = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            [id],
            row_to_reminder,
        )
        .optional()?;
    Ok(reminder)
}

fn not_found(id: i64) -> StoreError {
    StoreError::NotFound {
        what: format!("reminder {id}"),
    }
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn row_to_reminder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reminder> {
    let date: String = row.get(2)?;
    let time: String = row.get(3)?;
    let source: String = row.get(6)?;
    let event_kind: Option<String> = row.get(8)?;
    let created_at: String = row.get(10)?;
    Ok(Reminder {
        id: row.get(0)?,
        text: row.get(1)?,
        date: NaiveDate::parse_from_str(&date, DATE_FMT)
            .map_err(|e| conversion_error(2, e.to_string()))?,
        time: NaiveTime::parse_from_str(&time, TIME_FMT)
            .map_err(|e| conversion_error(3, e.to_string()))?,
        subject: row.get(4)?,
        sent: row.get(5)?,
        source: source.parse().map_err(|e| conversion_error(6, e))?,
        document_id: row.get(7)?,
        event_kind: event_kind
            .map(|k| k.parse())
            .transpose()
            .map_err(|e| conversion_error(8, e))?,
        confidence: row.get(9)?,
        created_at: parse_ts(10, &created_at)?,
    })
}
