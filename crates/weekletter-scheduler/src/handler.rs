use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use weekletter_core::Period;

use crate::{
    check::DocumentPipeline,
    error::Result,
    types::{DOCUMENT_CHECK_JOB, RETRY_SWEEP_JOB},
};

/// Work behind a named, cron-scheduled job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Job name; the primary key in the `jobs` table.
    fn name(&self) -> &str;

    async fn run(&self, now: DateTime<Utc>) -> Result<()>;
}

/// Refreshes the current period for every subject.
pub struct DocumentCheckJob {
    pipeline: Arc<DocumentPipeline>,
}

impl DocumentCheckJob {
    pub fn new(pipeline: Arc<DocumentPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl JobHandler for DocumentCheckJob {
    fn name(&self) -> &str {
        DOCUMENT_CHECK_JOB
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        // Weeks follow the local calendar.
        let period = Period::from_date(now.with_timezone(&Local).date_naive());
        self.pipeline.check_all(period, now).await;
        Ok(())
    }
}

/// Re-runs checks whose retry time has arrived.
pub struct RetrySweepJob {
    pipeline: Arc<DocumentPipeline>,
}

impl RetrySweepJob {
    pub fn new(pipeline: Arc<DocumentPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl JobHandler for RetrySweepJob {
    fn name(&self) -> &str {
        RETRY_SWEEP_JOB
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        self.pipeline.sweep(now).await?;
        Ok(())
    }
}
