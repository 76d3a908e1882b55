use serde::Serialize;

/// One sink that could not be reached for a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    pub sink: String,
    pub error: String,
}

/// Per-sink outcome of a publish. A publish never fails as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub delivered: Vec<String>,
    pub failed: Vec<DeliveryFailure>,
}

impl PublishReport {
    /// True when no sink was attempted (none registered or all filtered out).
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty()
    }

    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}
