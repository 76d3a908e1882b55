//! `weekletter-store`: SQLite persistence for week letters, fetch retries
//! and reminders.
//!
//! Each store wraps its own [`rusqlite::Connection`] behind a mutex, so the
//! daemon opens one connection per store against the same database file.
//! Every store runs [`db::init_db`] on construction; the schema is idempotent.
//!
//! | Table            | Store                         |
//! |------------------|-------------------------------|
//! | `documents`      | [`DocumentStore`]             |
//! | `retry_attempts` | [`RetryTracker`]              |
//! | `reminders`      | [`ReminderStore`]             |

pub mod db;
pub mod documents;
pub mod error;
pub mod reminders;
pub mod retry;

pub use documents::{DocumentStore, StoredDocument, UpsertOutcome};
pub use error::{Result, StoreError};
pub use reminders::{EventKind, NewReminder, Reminder, ReminderSource, ReminderStore};
pub use retry::{FailureOutcome, RetryPolicy, RetryRecord, RetryTracker};
