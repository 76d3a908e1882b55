//! `weekletter-scheduler`: tokio-driven job scheduler with SQLite persistence.
//!
//! # Overview
//!
//! A single periodic tick drives two kinds of work:
//!
//! | Work               | Gate                                            |
//! |--------------------|-------------------------------------------------|
//! | Reminder dispatch  | every tick, reminders with date/time <= now     |
//! | `document-check`   | cron from config, refreshes the current week    |
//! | `retry-sweep`      | cron from config, re-checks due retry records   |
//!
//! Jobs live in the `jobs` table. A job runs when `now` falls inside
//! `[next_run, next_run + execution_window]`; a job found later than that is
//! skipped to its next occurrence. Cron expressions use six fields (seconds
//! first) and are evaluated in UTC.

pub mod check;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod handler;
pub mod jobs;
pub mod schedule;
pub mod types;

pub use check::{CheckOutcome, DocumentPipeline};
pub use dispatch::{DispatchReport, ReminderDispatcher};
pub use engine::{SchedulerEngine, TickReport};
pub use error::{Result, SchedulerError};
pub use handler::{DocumentCheckJob, JobHandler, RetrySweepJob};
pub use jobs::JobStore;
pub use types::{JobStatus, Readiness, ScheduledJob, DOCUMENT_CHECK_JOB, RETRY_SWEEP_JOB};
