use thiserror::Error;
use weekletter_core::Period;
use weekletter_store::StoreError;

/// Failures reported by a [`ContentSource`](crate::ContentSource).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("fetch failed: {0}")]
    Source(#[from] SourceError),

    #[error("fetch timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl AcquisitionError {
    /// Fetch-side failures count toward retry accounting; store failures do
    /// not.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, AcquisitionError::Source(_) | AcquisitionError::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid extractor output: {0}")]
    InvalidOutput(String),

    #[error("no stored document for {subject} {period}")]
    DocumentMissing { subject: String, period: Period },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
