use thiserror::Error;

/// Errors that can occur while delivering to a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The message could not be handed to the remote endpoint.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The endpoint answered with a non-success status.
    #[error("Rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Delivery exceeded its time budget.
    #[error("Delivery timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The sink configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        SinkError::SendFailed(e.to_string())
    }
}
