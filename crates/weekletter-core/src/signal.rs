//! Notification types shared between the scheduler and every sink.

use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::period::Period;

/// What happened. Sinks may format differently per kind; the default text
/// rendering is [`Notification::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// A new or edited week letter is available.
    DocumentReady,
    /// A reminder reached its target time.
    ReminderDue,
    /// A reminder matured while the daemon was not running.
    MissedReminder,
    /// First failed fetch for a period; retries are now scheduled.
    RetryScheduled,
    /// Retries for a period ran out.
    FetchExhausted,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalKind::DocumentReady => "document_ready",
            SignalKind::ReminderDue => "reminder_due",
            SignalKind::MissedReminder => "missed_reminder",
            SignalKind::RetryScheduled => "retry_scheduled",
            SignalKind::FetchExhausted => "fetch_exhausted",
        };
        write!(f, "{s}")
    }
}

/// A message ready for delivery to one or more sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: SignalKind,
    /// Subject the notification is about. `None` for subject-less reminders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn document_ready(subject: &str, display_name: &str, period: Period, content: &str) -> Self {
        Self {
            kind: SignalKind::DocumentReady,
            subject: Some(subject.to_string()),
            title: format!("Week letter for {display_name}, {period}"),
            body: content.to_string(),
        }
    }

    pub fn reminder_due(subject: Option<&str>, text: &str) -> Self {
        Self {
            kind: SignalKind::ReminderDue,
            subject: subject.map(String::from),
            title: "Reminder".to_string(),
            body: text.to_string(),
        }
    }

    /// Reminder delivered late; `delay` is how long ago it was due.
    pub fn missed_reminder(subject: Option<&str>, text: &str, delay: Duration) -> Self {
        Self {
            kind: SignalKind::MissedReminder,
            subject: subject.map(String::from),
            title: format!("Missed reminder (due {} ago)", format_delay(delay)),
            body: text.to_string(),
        }
    }

    pub fn retry_scheduled(
        subject: &str,
        display_name: &str,
        period: Period,
        interval: Duration,
        max_attempts: u32,
    ) -> Self {
        let window = interval * max_attempts as i32;
        Self {
            kind: SignalKind::RetryScheduled,
            subject: Some(subject.to_string()),
            title: format!("Could not fetch the week letter for {display_name}, {period}"),
            body: format!(
                "Retrying every {} for up to {} ({} more attempts).",
                format_delay(interval),
                format_delay(window),
                max_attempts.saturating_sub(1)
            ),
        }
    }

    pub fn fetch_exhausted(subject: &str, display_name: &str, period: Period, attempts: u32) -> Self {
        Self {
            kind: SignalKind::FetchExhausted,
            subject: Some(subject.to_string()),
            title: format!("Giving up on the week letter for {display_name}, {period}"),
            body: format!(
                "Fetching failed {attempts} times. No further attempts will be made until the retry record is cleared."
            ),
        }
    }

    /// Plain-text rendering used by sinks that have no richer format.
    pub fn render(&self) -> String {
        if self.body.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, self.body)
        }
    }
}

/// Human-readable duration, coarsest two units: `2d 3h`, `1h 5m`, `42s`.
pub fn format_delay(delay: Duration) -> String {
    let secs = delay.num_seconds().max(0);
    let (days, hours, minutes) = (secs / 86_400, (secs % 86_400) / 3_600, (secs % 3_600) / 60);
    match (days, hours, minutes) {
        (0, 0, 0) => format!("{secs}s"),
        (0, 0, m) => format!("{m}m"),
        (0, h, 0) => format!("{h}h"),
        (0, h, m) => format!("{h}h {m}m"),
        (d, 0, _) => format!("{d}d"),
        (d, h, _) => format!("{d}d {h}h"),
    }
}
