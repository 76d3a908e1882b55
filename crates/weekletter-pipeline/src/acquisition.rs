use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, info, instrument};
use weekletter_core::Period;
use weekletter_store::{DocumentStore, StoredDocument};

use crate::cache::DocumentCache;
use crate::error::AcquisitionError;
use crate::source::{ContentSource, FetchOutcome};

/// Result of [`AcquisitionService::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Document(StoredDocument),
    /// Nothing written for this period yet. Not an error.
    Empty(Period),
}

impl Resolved {
    pub fn document(&self) -> Option<&StoredDocument> {
        match self {
            Resolved::Document(doc) => Some(doc),
            Resolved::Empty(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Resolved::Empty(_))
    }
}

/// Result of [`AcquisitionService::refresh`].
#[derive(Debug, Clone, PartialEq)]
pub enum Refresh {
    Fetched {
        document: StoredDocument,
        /// False when the upstream text hashed the same as the stored copy.
        changed: bool,
    },
    NotPublished,
}

/// Acquisition Service: cache → Content Store → Content Source.
pub struct AcquisitionService {
    cache: Arc<DocumentCache>,
    documents: Arc<DocumentStore>,
    source: Arc<dyn ContentSource>,
    fetch_timeout: Duration,
}

impl AcquisitionService {
    pub fn new(
        cache: Arc<DocumentCache>,
        documents: Arc<DocumentStore>,
        source: Arc<dyn ContentSource>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            documents,
            source,
            fetch_timeout,
        }
    }

    /// Resolve the letter for the ISO week containing `date`.
    pub async fn resolve(
        &self,
        subject: &str,
        date: NaiveDate,
        allow_remote_fetch: bool,
    ) -> Result<Resolved, AcquisitionError> {
        self.resolve_period(subject, Period::from_date(date), allow_remote_fetch)
            .await
    }

    #[instrument(skip(self))]
    pub async fn resolve_period(
        &self,
        subject: &str,
        period: Period,
        allow_remote_fetch: bool,
    ) -> Result<Resolved, AcquisitionError> {
        if let Some(doc) = self.cache.get(subject, period) {
            debug!("cache hit");
            return Ok(Resolved::Document(doc));
        }

        if let Some(doc) = self.documents.get(subject, period)? {
            debug!("store hit");
            self.cache.insert(doc.clone());
            return Ok(Resolved::Document(doc));
        }

        if !allow_remote_fetch {
            debug!("no stored letter and remote fetch disabled");
            return Ok(Resolved::Empty(period));
        }

        match self.fetch(subject, period).await? {
            FetchOutcome::NotPublished => Ok(Resolved::Empty(period)),
            FetchOutcome::Published(content) => {
                let stored = self.documents.upsert(subject, period, &content)?;
                self.cache.insert(stored.document.clone());
                Ok(Resolved::Document(stored.document))
            }
        }
    }

    /// Fetch from the source unconditionally and reconcile with the store.
    ///
    /// Unlike [`resolve_period`](Self::resolve_period) this never answers
    /// from the cache or store, so edits to an already stored letter are
    /// observed.
    #[instrument(skip(self))]
    pub async fn refresh(&self, subject: &str, period: Period) -> Result<Refresh, AcquisitionError> {
        match self.fetch(subject, period).await? {
            FetchOutcome::NotPublished => {
                debug!("nothing published yet");
                Ok(Refresh::NotPublished)
            }
            FetchOutcome::Published(content) => {
                let stored = self.documents.upsert(subject, period, &content)?;
                self.cache.insert(stored.document.clone());
                if stored.changed {
                    info!(subject, %period, "new week letter content");
                }
                Ok(Refresh::Fetched {
                    document: stored.document,
                    changed: stored.changed,
                })
            }
        }
    }

    /// Record per-sink delivery of `hash` and refresh the cached copy.
    pub fn mark_posted(
        &self,
        subject: &str,
        period: Period,
        hash: &str,
        sinks: &[String],
    ) -> Result<bool, AcquisitionError> {
        let applied = self.documents.mark_posted(subject, period, hash, sinks)?;
        self.reload(subject, period)?;
        Ok(applied)
    }

    /// Re-read the stored letter into the cache after a store-side flag
    /// change. A letter that no longer exists is evicted.
    pub fn reload(&self, subject: &str, period: Period) -> Result<Option<StoredDocument>, AcquisitionError> {
        let doc = self.documents.get(subject, period)?;
        match &doc {
            Some(doc) => self.cache.insert(doc.clone()),
            None => self.cache.invalidate(subject, period),
        }
        Ok(doc)
    }

    /// Administrative delete of the stored letter and its cache entry.
    pub fn purge(&self, subject: &str, period: Period) -> Result<bool, AcquisitionError> {
        self.cache.invalidate(subject, period);
        Ok(self.documents.purge(subject, period)?)
    }

    async fn fetch(&self, subject: &str, period: Period) -> Result<FetchOutcome, AcquisitionError> {
        let outcome = tokio::time::timeout(self.fetch_timeout, self.source.fetch(subject, period))
            .await
            .map_err(|_| AcquisitionError::Timeout {
                ms: self.fetch_timeout.as_millis() as u64,
            })??;
        Ok(match outcome {
            FetchOutcome::Published(text) => FetchOutcome::from_text(text),
            other => other,
        })
    }
}
