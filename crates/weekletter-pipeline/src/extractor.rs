use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use weekletter_core::Period;
use weekletter_store::EventKind;

use crate::error::ExtractionError;

/// One dated item found in a week letter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub date: NaiveDate,
    /// Model-reported certainty in [0, 1].
    pub confidence: f64,
}

impl CandidateEvent {
    /// Reminder text shown to users.
    pub fn reminder_text(&self) -> String {
        let title = self.title.trim();
        let description = self.description.trim();
        if description.is_empty() {
            title.to_string()
        } else {
            format!("{title}: {description}")
        }
    }

    /// Confidence inside [0, 1] and a usable title.
    pub fn is_well_formed(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence) && !self.title.trim().is_empty()
    }
}

/// Finds dated events in unstructured letter text.
#[async_trait]
pub trait EventExtractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(
        &self,
        text: &str,
        period: Period,
    ) -> Result<Vec<CandidateEvent>, ExtractionError>;
}

/// Parse a JSON array of candidates out of raw model output.
///
/// Tolerates surrounding prose and markdown code fences by taking the
/// outermost `[` ... `]` span.
pub fn parse_candidates(raw: &str) -> Result<Vec<CandidateEvent>, ExtractionError> {
    let start = raw.find('[');
    let end = raw.rfind(']');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &raw[s..=e],
        _ => {
            return Err(ExtractionError::InvalidOutput(
                "no JSON array in extractor output".to_string(),
            ))
        }
    };
    serde_json::from_str(json).map_err(|e| ExtractionError::InvalidOutput(e.to_string()))
}
