use dashmap::DashMap;
use weekletter_core::Period;
use weekletter_store::StoredDocument;

/// In-process document cache keyed by (subject, period).
///
/// Constructed once and shared by reference; last writer wins. Keys never
/// span subjects, so no cross-entry locking is needed.
#[derive(Default)]
pub struct DocumentCache {
    entries: DashMap<(String, Period), StoredDocument>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subject: &str, period: Period) -> Option<StoredDocument> {
        self.entries
            .get(&(subject.to_string(), period))
            .map(|e| e.value().clone())
    }

    pub fn insert(&self, document: StoredDocument) {
        self.entries
            .insert((document.subject.clone(), document.period), document);
    }

    pub fn invalidate(&self, subject: &str, period: Period) {
        self.entries.remove(&(subject.to_string(), period));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
