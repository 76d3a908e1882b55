use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use weekletter_channels::Distributor;
use weekletter_core::{config::SubjectConfig, Notification, Period};
use weekletter_pipeline::{AcquisitionError, AcquisitionService, ExtractionService, Refresh};
use weekletter_store::{FailureOutcome, RetryTracker, StoredDocument};

use crate::error::Result;

/// What one per-subject check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Exhausted, or waiting for its next retry time.
    Skipped,
    NotPublished,
    /// Every routed sink already has this content.
    Unchanged,
    /// Document-ready went out to these sinks.
    Announced { sinks: Vec<String> },
    /// Fetch failed; the retry record was created or bumped.
    RetryPending { attempts: u32 },
    /// Fetch failed and the attempt budget is spent.
    Exhausted,
}

/// The per-subject document check shared by `document-check` and
/// `retry-sweep`.
///
/// Checks of the same (subject, period) never overlap, so both jobs firing
/// in one tick consume a single retry slot.
pub struct DocumentPipeline {
    subjects: HashMap<String, SubjectConfig>,
    acquisition: Arc<AcquisitionService>,
    retries: Arc<RetryTracker>,
    distributor: Arc<Distributor>,
    extraction: Option<Arc<ExtractionService>>,
    in_progress: DashMap<(String, Period), Arc<Mutex<()>>>,
}

impl DocumentPipeline {
    pub fn new(
        subjects: Vec<SubjectConfig>,
        acquisition: Arc<AcquisitionService>,
        retries: Arc<RetryTracker>,
        distributor: Arc<Distributor>,
        extraction: Option<Arc<ExtractionService>>,
    ) -> Self {
        Self {
            subjects: subjects.into_iter().map(|s| (s.id.clone(), s)).collect(),
            acquisition,
            retries,
            distributor,
            extraction,
            in_progress: DashMap::new(),
        }
    }

    /// Check every configured subject for `period`, one task per subject.
    pub async fn check_all(self: &Arc<Self>, period: Period, now: DateTime<Utc>) {
        let mut tasks = JoinSet::new();
        for id in self.subjects.keys().cloned() {
            let this = Arc::clone(self);
            tasks.spawn(async move {
                let outcome = this.check_subject(&id, period, now).await;
                (id, outcome)
            });
        }
        drain(tasks).await;
    }

    /// Re-check every (subject, period) whose retry time has arrived.
    pub async fn sweep(self: &Arc<Self>, now: DateTime<Utc>) -> Result<usize> {
        let due = self.retries.due(now)?;
        let count = due.len();
        if count > 0 {
            info!(count, "retrying failed fetches");
        }

        let mut tasks = JoinSet::new();
        for record in due {
            if !self.subjects.contains_key(&record.subject) {
                warn!(subject = %record.subject, "retry record for unconfigured subject");
                continue;
            }
            let this = Arc::clone(self);
            tasks.spawn(async move {
                let outcome = this.check_subject(&record.subject, record.period, now).await;
                (record.subject, outcome)
            });
        }
        drain(tasks).await;
        Ok(count)
    }

    #[instrument(skip(self, now))]
    pub async fn check_subject(
        &self,
        subject: &str,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome> {
        let gate = self
            .in_progress
            .entry((subject.to_string(), period))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _checking = gate.lock().await;

        if let Some(record) = self.retries.get(subject, period)? {
            if record.exhausted {
                debug!("retries exhausted, skipping");
                return Ok(CheckOutcome::Skipped);
            }
            if !record.is_due(now) {
                debug!(next_attempt = %record.next_attempt, "retry not due yet");
                return Ok(CheckOutcome::Skipped);
            }
        }

        match self.acquisition.refresh(subject, period).await {
            Ok(Refresh::NotPublished) => {
                // The source answered, so the failure streak is over.
                self.retries.record_success(subject, period)?;
                Ok(CheckOutcome::NotPublished)
            }
            Ok(Refresh::Fetched { document, .. }) => {
                self.retries.record_success(subject, period)?;
                let outcome = self.announce(&document).await?;
                self.extract(&document).await;
                self.acquisition.reload(subject, period)?;
                Ok(outcome)
            }
            Err(e) if e.is_fetch_failure() => self.fetch_failed(subject, period, now, &e).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn announce(&self, document: &StoredDocument) -> Result<CheckOutcome> {
        let subject = &document.subject;
        let pending = document.pending_sinks(&self.distributor.sink_names(subject));
        if pending.is_empty() {
            debug!("no sink is missing this content");
            return Ok(CheckOutcome::Unchanged);
        }

        let notification = Notification::document_ready(
            subject,
            self.display_name(subject),
            document.period,
            &document.content,
        );
        let report = self
            .distributor
            .publish_to(subject, &notification, &pending)
            .await;
        for failure in &report.failed {
            warn!(sink = %failure.sink, error = %failure.error, "document-ready not delivered");
        }

        self.acquisition.mark_posted(
            subject,
            document.period,
            &document.content_hash,
            &report.delivered,
        )?;
        info!(sinks = ?report.delivered, "week letter announced");
        Ok(CheckOutcome::Announced {
            sinks: report.delivered,
        })
    }

    async fn extract(&self, document: &StoredDocument) {
        let Some(extraction) = &self.extraction else {
            return;
        };
        if document.is_extracted_for(&document.content_hash) {
            return;
        }
        if let Err(e) = extraction
            .extract_and_store(
                &document.subject,
                document.period,
                &document.content,
                &document.content_hash,
            )
            .await
        {
            warn!(subject = %document.subject, "extraction failed: {e}");
        }
    }

    async fn fetch_failed(
        &self,
        subject: &str,
        period: Period,
        now: DateTime<Utc>,
        cause: &AcquisitionError,
    ) -> Result<CheckOutcome> {
        warn!(%cause, "week letter fetch failed");
        let outcome = self.retries.record_failure_at(subject, period, now)?;
        let record = outcome.record();
        let name = self.display_name(subject);

        match &outcome {
            FailureOutcome::FirstFailure(_) => {
                let interval = self.retries.policy().interval;
                let n = Notification::retry_scheduled(
                    subject,
                    name,
                    period,
                    interval,
                    record.max_attempts,
                );
                self.distributor.publish(subject, &n).await;
                Ok(CheckOutcome::RetryPending {
                    attempts: record.attempts,
                })
            }
            FailureOutcome::Retrying(_) => Ok(CheckOutcome::RetryPending {
                attempts: record.attempts,
            }),
            FailureOutcome::Exhausted(_) => {
                let n = Notification::fetch_exhausted(subject, name, period, record.attempts);
                self.distributor.publish(subject, &n).await;
                Ok(CheckOutcome::Exhausted)
            }
            FailureOutcome::AlreadyExhausted(_) => Ok(CheckOutcome::Exhausted),
        }
    }

    fn display_name<'a>(&'a self, subject: &'a str) -> &'a str {
        self.subjects
            .get(subject)
            .map(SubjectConfig::display_name)
            .unwrap_or(subject)
    }
}

async fn drain(mut tasks: JoinSet<(String, Result<CheckOutcome>)>) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((subject, Ok(outcome))) => debug!(%subject, ?outcome, "subject checked"),
            Ok((subject, Err(e))) => error!(%subject, "subject check failed: {e}"),
            Err(e) => error!("subject check task panicked: {e}"),
        }
    }
}
