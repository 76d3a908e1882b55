use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, error, info, warn};
use weekletter_channels::{Distributor, PublishReport};
use weekletter_core::Notification;
use weekletter_store::{Reminder, ReminderStore};

use crate::error::Result;

/// Counts from one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Reminders claimed and handed to the distributor.
    pub dispatched: usize,
    /// Reminders claimed by someone else first, or whose claim failed.
    pub skipped: usize,
}

/// Delivers due reminders at most once.
///
/// Each reminder is claimed with a conditional `sent = 0 → 1` update before
/// it is published, so overlapping passes never deliver the same row twice.
pub struct ReminderDispatcher {
    reminders: Arc<ReminderStore>,
    distributor: Arc<Distributor>,
}

impl ReminderDispatcher {
    pub fn new(reminders: Arc<ReminderStore>, distributor: Arc<Distributor>) -> Self {
        Self {
            reminders,
            distributor,
        }
    }

    /// Deliver every reminder due at `now` (local wall clock) as `ReminderDue`.
    pub async fn dispatch_due(&self, now: NaiveDateTime) -> Result<DispatchReport> {
        self.dispatch(now, |r| Notification::reminder_due(r.subject.as_deref(), &r.text))
            .await
    }

    /// Startup pass: every overdue reminder is delivered as `MissedReminder`
    /// carrying how late it is.
    pub async fn recover_missed(&self, now: NaiveDateTime) -> Result<DispatchReport> {
        let report = self
            .dispatch(now, |r| {
                Notification::missed_reminder(r.subject.as_deref(), &r.text, now - r.due_at())
            })
            .await?;
        if report.dispatched > 0 {
            warn!(count = report.dispatched, "missed reminders delivered on startup");
        }
        Ok(report)
    }

    async fn dispatch<F>(&self, now: NaiveDateTime, build: F) -> Result<DispatchReport>
    where
        F: Fn(&Reminder) -> Notification,
    {
        let due = self.reminders.due(now)?;
        let mut report = DispatchReport::default();

        for reminder in due {
            match self.reminders.mark_sent(reminder.id) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(id = reminder.id, "reminder already claimed");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(id = reminder.id, "failed to claim reminder: {e}");
                    report.skipped += 1;
                    continue;
                }
            }

            let notification = build(&reminder);
            let delivery = self.deliver(&reminder, &notification).await;
            if !delivery.all_delivered() {
                warn!(id = reminder.id, failed = delivery.failed.len(), "reminder partially delivered");
            }
            info!(id = reminder.id, kind = %notification.kind, "reminder dispatched");
            report.dispatched += 1;
        }
        Ok(report)
    }

    async fn deliver(&self, reminder: &Reminder, notification: &Notification) -> PublishReport {
        match reminder.subject.as_deref() {
            Some(subject) => self.distributor.publish(subject, notification).await,
            None => self.distributor.broadcast(notification).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{Duration, NaiveDate, NaiveTime};
    use rusqlite::Connection;
    use tokio::sync::Mutex;
    use weekletter_channels::{Sink, SinkError};
    use weekletter_core::SignalKind;
    use weekletter_store::NewReminder;

    use super::*;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Sink for Recording {
        fn name(&self) -> &str {
            "rec"
        }

        async fn deliver(&self, n: &Notification) -> std::result::Result<(), SinkError> {
            self.seen.lock().await.push(n.clone());
            Ok(())
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 15)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn setup() -> (ReminderDispatcher, Arc<ReminderStore>, Arc<Recording>) {
        let sink = Arc::new(Recording::default());
        let mut distributor = Distributor::new();
        distributor.register(sink.clone());
        distributor.route("emma", "rec");
        let reminders = Arc::new(ReminderStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let d = ReminderDispatcher::new(Arc::clone(&reminders), Arc::new(distributor));
        (d, reminders, sink)
    }

    fn add(store: &ReminderStore, text: &str, due: NaiveDateTime, subject: Option<&str>) -> i64 {
        store
            .add_manual(&NewReminder::manual(text, due.date(), due.time(), subject))
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn due_reminders_are_sent_once_in_order() {
        let (d, store, sink) = setup();
        add(&store, "second", now() - Duration::minutes(1), Some("emma"));
        add(&store, "first", now() - Duration::minutes(5), Some("emma"));
        add(&store, "later", now() + Duration::hours(1), Some("emma"));

        let report = d.dispatch_due(now()).await.unwrap();
        assert_eq!(report.dispatched, 2);

        let again = d.dispatch_due(now()).await.unwrap();
        assert_eq!(again.dispatched, 0);

        let seen = sink.seen.lock().await;
        let bodies: Vec<_> = seen.iter().map(|n| n.body.as_str()).collect();
        assert_eq!(bodies, ["first", "second"]);
        assert!(seen.iter().all(|n| n.kind == SignalKind::ReminderDue));
    }

    #[tokio::test]
    async fn subjectless_reminders_are_broadcast() {
        let (d, store, sink) = setup();
        add(&store, "pay lunch money", now(), None);

        d.dispatch_due(now()).await.unwrap();
        let seen = sink.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].subject, None);
    }

    #[tokio::test]
    async fn missed_reminders_carry_the_delay() {
        let (d, store, sink) = setup();
        let id = add(&store, "sign zoo form", now() - Duration::minutes(135), Some("emma"));

        let report = d.recover_missed(now()).await.unwrap();
        assert_eq!(report.dispatched, 1);

        let seen = sink.seen.lock().await;
        assert_eq!(seen[0].kind, SignalKind::MissedReminder);
        assert!(seen[0].title.contains("2h 15m"));
        assert!(store.get(id).unwrap().unwrap().sent);
    }
}
