use std::sync::Arc;

use chrono::NaiveTime;
use tracing::{debug, info, instrument, warn};
use weekletter_core::Period;
use weekletter_store::{DocumentStore, NewReminder, Reminder, ReminderStore};

use crate::error::ExtractionError;
use crate::extractor::EventExtractor;

/// What one [`ExtractionService::extract_and_store`] call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionOutcome {
    /// Reminders now linked to the document.
    pub created: Vec<Reminder>,
    /// The extractor ran but nothing passed the filters.
    pub none_found: bool,
    /// Nothing ran: already extracted for this hash, or the stored content
    /// moved on.
    pub skipped: bool,
}

impl ExtractionOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

/// Extraction Service: turns stored letters into auto-extracted reminders.
pub struct ExtractionService {
    documents: Arc<DocumentStore>,
    reminders: Arc<ReminderStore>,
    extractor: Arc<dyn EventExtractor>,
    confidence_threshold: f64,
    reminder_time: NaiveTime,
}

impl ExtractionService {
    pub fn new(
        documents: Arc<DocumentStore>,
        reminders: Arc<ReminderStore>,
        extractor: Arc<dyn EventExtractor>,
        confidence_threshold: f64,
        reminder_time: NaiveTime,
    ) -> Self {
        Self {
            documents,
            reminders,
            extractor,
            confidence_threshold,
            reminder_time,
        }
    }

    #[instrument(skip(self, content), fields(extractor = self.extractor.name()))]
    pub async fn extract_and_store(
        &self,
        subject: &str,
        period: Period,
        content: &str,
        content_hash: &str,
    ) -> Result<ExtractionOutcome, ExtractionError> {
        let doc = self
            .documents
            .get(subject, period)?
            .ok_or_else(|| ExtractionError::DocumentMissing {
                subject: subject.to_string(),
                period,
            })?;

        if doc.content_hash != content_hash {
            debug!("stored content superseded, skipping extraction");
            return Ok(ExtractionOutcome::skipped());
        }
        if doc.is_extracted_for(content_hash) {
            debug!("already extracted for this content");
            return Ok(ExtractionOutcome::skipped());
        }

        let candidates = self.extractor.extract(content, period).await?;
        let total = candidates.len();

        let items: Vec<NewReminder> = candidates
            .into_iter()
            .filter(|c| {
                if !c.is_well_formed() {
                    warn!(title = %c.title, confidence = c.confidence, "discarding malformed candidate");
                    return false;
                }
                c.confidence >= self.confidence_threshold
            })
            .map(|c| NewReminder {
                text: c.reminder_text(),
                date: c.date,
                time: self.reminder_time,
                subject: Some(subject.to_string()),
                event_kind: Some(c.kind),
                confidence: Some(c.confidence),
            })
            .collect();

        let created = self.reminders.replace_auto_extracted(doc.id, &items)?;
        if !self.documents.mark_extracted(subject, period, content_hash)? {
            debug!("content changed during extraction; document left unflagged");
        }

        info!(candidates = total, created = created.len(), "extraction finished");
        Ok(ExtractionOutcome {
            none_found: created.is_empty(),
            created,
            skipped: false,
        })
    }
}
