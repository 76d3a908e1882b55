use thiserror::Error;
use weekletter_pipeline::AcquisitionError;
use weekletter_store::StoreError;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    /// The cron expression could not be parsed or never fires.
    #[error("Invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    /// No job with the given name exists in the store.
    #[error("Job not found: {name}")]
    JobNotFound { name: String },

    #[error("Job {name} panicked: {reason}")]
    JobPanicked { name: String, reason: String },

    #[error("Job store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
