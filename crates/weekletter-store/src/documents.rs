use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use weekletter_core::{content_hash, Period};

use crate::db::{format_ts, init_db, lock, parse_ts};
use crate::error::{Result, StoreError};

const SELECT_COLUMNS: &str = "SELECT id, subject, week, year, content, content_hash, posted,
        auto_extracted, extracted_hash, created_at, updated_at
     FROM documents";

/// A week letter as last fetched for one subject and period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: i64,
    pub subject: String,
    pub period: Period,
    pub content: String,
    pub content_hash: String,
    /// Sink name → delivered for the current `content_hash`.
    pub posted: BTreeMap<String, bool>,
    pub auto_extracted: bool,
    /// Hash the last extraction ran against.
    pub extracted_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredDocument {
    pub fn is_posted_to(&self, sink: &str) -> bool {
        self.posted.get(sink).copied().unwrap_or(false)
    }

    /// Sinks from `registered` that have not received the current content.
    pub fn pending_sinks(&self, registered: &[String]) -> Vec<String> {
        registered
            .iter()
            .filter(|name| !self.is_posted_to(name))
            .cloned()
            .collect()
    }

    /// Extraction already ran for exactly this content.
    pub fn is_extracted_for(&self, hash: &str) -> bool {
        self.auto_extracted && self.extracted_hash.as_deref() == Some(hash)
    }
}

/// Result of [`DocumentStore::upsert`].
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub document: StoredDocument,
    /// False when the stored hash already matched and nothing was written.
    pub changed: bool,
}

/// Content Store: at most one [`StoredDocument`] per (subject, period).
pub struct DocumentStore {
    db: Mutex<Connection>,
}

impl DocumentStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    #[instrument(skip(self))]
    pub fn get(&self, subject: &str, period: Period) -> Result<Option<StoredDocument>> {
        let db = lock(&self.db)?;
        fetch(&db, subject, period)
    }

    /// Insert or update the document for (subject, period).
    ///
    /// Unchanged content is a no-op. Changed content replaces the body and
    /// hash and resets the posted flags and extraction flag, since neither
    /// applies to the new text.
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub fn upsert(&self, subject: &str, period: Period, content: &str) -> Result<UpsertOutcome> {
        let hash = content_hash(content);
        let mut db = lock(&self.db)?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = fetch(&tx, subject, period)? {
            if existing.content_hash == hash {
                debug!("content unchanged, skipping write");
                tx.commit()?;
                return Ok(UpsertOutcome {
                    document: existing,
                    changed: false,
                });
            }
        }

        let now = format_ts(Utc::now());
        tx.execute(
            "INSERT INTO documents
             (subject, week, year, content, content_hash, posted, auto_extracted,
              extracted_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, '{}', 0, NULL, ?6, ?6)
             ON CONFLICT(subject, week, year) DO UPDATE SET
                content        = excluded.content,
                content_hash   = excluded.content_hash,
                posted         = '{}',
                auto_extracted = 0,
                updated_at     = excluded.updated_at",
            rusqlite::params![subject, period.week, period.year, content, hash, now],
        )?;
        let document = fetch(&tx, subject, period)?.ok_or_else(|| StoreError::NotFound {
            what: format!("document {subject} {period}"),
        })?;
        tx.commit()?;

        info!(subject, %period, hash = %short(&hash), "document stored");
        Ok(UpsertOutcome {
            document,
            changed: true,
        })
    }

    /// Record successful delivery to `sinks`.
    ///
    /// Only applies while the stored hash still equals `hash`: if the
    /// content changed between announce and mark, the flags stay reset.
    /// Returns whether the flags were updated.
    pub fn mark_posted(
        &self,
        subject: &str,
        period: Period,
        hash: &str,
        sinks: &[String],
    ) -> Result<bool> {
        if sinks.is_empty() {
            return Ok(false);
        }
        let mut db = lock(&self.db)?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(mut doc) = fetch(&tx, subject, period)? else {
            return Ok(false);
        };
        if doc.content_hash != hash {
            debug!(subject, %period, "content changed since announce, not marking posted");
            return Ok(false);
        }
        for sink in sinks {
            doc.posted.insert(sink.clone(), true);
        }
        let posted = serde_json::to_string(&doc.posted)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        tx.execute(
            "UPDATE documents SET posted = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![posted, format_ts(Utc::now()), doc.id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Flag the document as auto-extracted for `hash`. No-op (returns false)
    /// when the stored content no longer has that hash.
    pub fn mark_extracted(&self, subject: &str, period: Period, hash: &str) -> Result<bool> {
        let db = lock(&self.db)?;
        let n = db.execute(
            "UPDATE documents SET auto_extracted = 1, extracted_hash = ?4, updated_at = ?5
             WHERE subject = ?1 AND week = ?2 AND year = ?3 AND content_hash = ?4",
            rusqlite::params![subject, period.week, period.year, hash, format_ts(Utc::now())],
        )?;
        Ok(n > 0)
    }

    /// Administrative delete. Returns whether a row existed.
    pub fn purge(&self, subject: &str, period: Period) -> Result<bool> {
        let db = lock(&self.db)?;
        let n = db.execute(
            "DELETE FROM documents WHERE subject = ?1 AND week = ?2 AND year = ?3",
            rusqlite::params![subject, period.week, period.year],
        )?;
        if n > 0 {
            info!(subject, %period, "document purged");
        }
        Ok(n > 0)
    }

    /// All documents for `subject`, newest period first.
    pub fn list(&self, subject: &str) -> Result<Vec<StoredDocument>> {
        let db = lock(&self.db)?;
        let mut stmt = db.prepare(&format!(
            "{SELECT_COLUMNS} WHERE subject = ?1 ORDER BY year DESC, week DESC"
        ))?;
        let rows = stmt.query_map([subject], row_to_document)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count(&self) -> Result<i64> {
        let db = lock(&self.db)?;
        Ok(db.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?)
    }
}

fn fetch(conn: &Connection, subject: &str, period: Period) -> Result<Option<StoredDocument>> {
    let doc = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE subject = ?1 AND week = ?2 AND year = ?3"),
            rusqlite::params![subject, period.week, period.year],
            row_to_document,
        )
        .optional()?;
    Ok(doc)
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredDocument> {
    let posted_raw: String = row.get(6)?;
    let posted = serde_json::from_str(&posted_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    Ok(StoredDocument {
        id: row.get(0)?,
        subject: row.get(1)?,
        period: Period {
            week: row.get(2)?,
            year: row.get(3)?,
        },
        content: row.get(4)?,
        content_hash: row.get(5)?,
        posted,
        auto_extracted: row.get(7)?,
        extracted_hash: row.get(8)?,
        created_at: parse_ts(9, &created_at)?,
        updated_at: parse_ts(10, &updated_at)?,
    })
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> DocumentStore {
        DocumentStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn week20() -> Period {
        Period::new(20, 2024).unwrap()
    }

    #[test]
    fn get_missing_returns_none() {
        assert!(store().get("emma", week20()).unwrap().is_none());
    }

    #[test]
    fn first_upsert_inserts_with_hash() {
        let s = store();
        let out = s.upsert("emma", week20(), "X").unwrap();
        assert!(out.changed);
        assert_eq!(out.document.content, "X");
        assert_eq!(out.document.content_hash, content_hash("X"));
        assert!(out.document.posted.is_empty());
        assert!(!out.document.auto_extracted);
    }

    #[test]
    fn same_content_is_not_rewritten() {
        let s = store();
        let first = s.upsert("emma", week20(), "X").unwrap();
        let second = s.upsert("emma", week20(), "X").unwrap();
        assert!(!second.changed);
        assert_eq!(second.document.updated_at, first.document.updated_at);
        assert_eq!(s.count().unwrap(), 1);
    }

    #[test]
    fn changed_content_updates_in_place_and_resets_flags() {
        let s = store();
        let first = s.upsert("emma", week20(), "X").unwrap();
        s.mark_posted("emma", week20(), &first.document.content_hash, &["chat".to_string()])
            .unwrap();
        s.mark_extracted("emma", week20(), &first.document.content_hash)
            .unwrap();

        let second = s.upsert("emma", week20(), "Y").unwrap();
        assert!(second.changed);
        assert_eq!(second.document.id, first.document.id);
        assert_eq!(second.document.content, "Y");
        assert!(!second.document.is_posted_to("chat"));
        assert!(!second.document.auto_extracted);
        assert_eq!(s.count().unwrap(), 1);
    }

    #[test]
    fn periods_and_subjects_are_distinct_rows() {
        let s = store();
        s.upsert("emma", week20(), "X").unwrap();
        s.upsert("emma", Period::new(21, 2024).unwrap(), "X").unwrap();
        s.upsert("oscar", week20(), "X").unwrap();
        assert_eq!(s.count().unwrap(), 3);
        assert_eq!(s.list("emma").unwrap()[0].period.week, 21);
    }

    #[test]
    fn mark_posted_tracks_pending_sinks() {
        let s = store();
        let doc = s.upsert("emma", week20(), "X").unwrap().document;
        let sinks = vec!["chat".to_string(), "mail".to_string()];
        assert_eq!(doc.pending_sinks(&sinks), sinks);

        assert!(s
            .mark_posted("emma", week20(), &doc.content_hash, &["chat".to_string()])
            .unwrap());
        let doc = s.get("emma", week20()).unwrap().unwrap();
        assert_eq!(doc.pending_sinks(&sinks), vec!["mail".to_string()]);
    }

    #[test]
    fn mark_posted_ignores_stale_hash() {
        let s = store();
        s.upsert("emma", week20(), "X").unwrap();
        s.upsert("emma", week20(), "Y").unwrap();
        let stale = content_hash("X");
        assert!(!s
            .mark_posted("emma", week20(), &stale, &["chat".to_string()])
            .unwrap());
        assert!(!s.get("emma", week20()).unwrap().unwrap().is_posted_to("chat"));
    }

    #[test]
    fn mark_extracted_records_hash() {
        let s = store();
        let doc = s.upsert("emma", week20(), "X").unwrap().document;
        assert!(!doc.is_extracted_for(&doc.content_hash));
        assert!(s.mark_extracted("emma", week20(), &doc.content_hash).unwrap());
        let doc = s.get("emma", week20()).unwrap().unwrap();
        assert!(doc.is_extracted_for(&content_hash("X")));
        assert!(!doc.is_extracted_for(&content_hash("Y")));
    }

    #[test]
    fn purge_removes_row() {
        let s = store();
        s.upsert("emma", week20(), "X").unwrap();
        assert!(s.purge("emma", week20()).unwrap());
        assert!(!s.purge("emma", week20()).unwrap());
        assert_eq!(s.count().unwrap(), 0);
    }
}
