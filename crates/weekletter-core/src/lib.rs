//! Shared building blocks for the week letter pipeline: configuration,
//! the top-level error type, period arithmetic, content hashing and the
//! notification types passed between the scheduler and the sinks.

pub mod config;
pub mod error;
pub mod hash;
pub mod period;
pub mod signal;

pub use error::{Result, WeekletterError};
pub use hash::content_hash;
pub use period::Period;
pub use signal::{Notification, SignalKind};
