// End-to-end runs of the document check, retry accounting, extraction and
// reminder recovery against in-memory stores.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};
use rusqlite::Connection;
use weekletter_channels::{Distributor, Sink, SinkError};
use weekletter_core::{
    config::{SchedulerConfig, SubjectConfig},
    content_hash, Notification, Period, SignalKind,
};
use weekletter_pipeline::{
    AcquisitionService, CandidateEvent, ContentSource, DocumentCache, EventExtractor,
    ExtractionError, ExtractionService, FetchOutcome, Resolved, SourceError,
};
use weekletter_scheduler::{
    CheckOutcome, DocumentPipeline, JobStore, ReminderDispatcher, SchedulerEngine,
};
use weekletter_store::{
    DocumentStore, EventKind, NewReminder, ReminderStore, RetryPolicy, RetryTracker,
};

// --- fakes -----------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Notification>>,
}

impl Recorder {
    fn kinds(&self) -> Vec<SignalKind> {
        self.seen.lock().unwrap().iter().map(|n| n.kind).collect()
    }

    fn count(&self, kind: SignalKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

#[async_trait]
impl Sink for Recorder {
    fn name(&self) -> &str {
        "family-chat"
    }

    async fn deliver(&self, n: &Notification) -> Result<(), SinkError> {
        self.seen.lock().unwrap().push(n.clone());
        Ok(())
    }
}

/// Serves whatever text is currently set; `None` means the portal is down.
struct Portal {
    text: Mutex<Option<String>>,
}

impl Portal {
    fn serving(text: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            text: Mutex::new(text.map(String::from)),
        })
    }
}

#[async_trait]
impl ContentSource for Portal {
    fn name(&self) -> &str {
        "portal"
    }

    async fn fetch(&self, _: &str, _: Period) -> Result<FetchOutcome, SourceError> {
        match self.text.lock().unwrap().clone() {
            Some(text) => Ok(FetchOutcome::Published(text)),
            None => Err(SourceError::Unavailable("portal down".into())),
        }
    }
}

/// Second chat that refuses deliveries while `down` is set.
struct Flaky {
    down: AtomicBool,
    delivered: AtomicUsize,
}

impl Flaky {
    fn down() -> Arc<Self> {
        Arc::new(Self {
            down: AtomicBool::new(true),
            delivered: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Sink for Flaky {
    fn name(&self) -> &str {
        "school-board"
    }

    async fn deliver(&self, _: &Notification) -> Result<(), SinkError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SinkError::SendFailed("board offline".into()));
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Portal that is down and takes a while to say so.
struct SlowOutage;

#[async_trait]
impl ContentSource for SlowOutage {
    fn name(&self) -> &str {
        "slow-outage"
    }

    async fn fetch(&self, _: &str, _: Period) -> Result<FetchOutcome, SourceError> {
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        Err(SourceError::Unavailable("gateway timeout".into()))
    }
}

struct Canned(Vec<CandidateEvent>);

#[async_trait]
impl EventExtractor for Canned {
    fn name(&self) -> &str {
        "canned"
    }

    async fn extract(&self, _: &str, _: Period) -> Result<Vec<CandidateEvent>, ExtractionError> {
        Ok(self.0.clone())
    }
}

// --- fixture ---------------------------------------------------------------

struct World {
    acquisition: Arc<AcquisitionService>,
    documents: Arc<DocumentStore>,
    retries: Arc<RetryTracker>,
    reminders: Arc<ReminderStore>,
    distributor: Arc<Distributor>,
    sink: Arc<Recorder>,
    pipeline: Arc<DocumentPipeline>,
}

fn mem() -> Connection {
    Connection::open_in_memory().unwrap()
}

fn world(source: Arc<dyn ContentSource>, extractor: Option<Arc<dyn EventExtractor>>) -> World {
    world_with(source, extractor, Vec::new())
}

fn world_with(
    source: Arc<dyn ContentSource>,
    extractor: Option<Arc<dyn EventExtractor>>,
    extra_sinks: Vec<Arc<dyn Sink>>,
) -> World {
    let documents = Arc::new(DocumentStore::new(mem()).unwrap());
    let reminders = Arc::new(ReminderStore::new(mem()).unwrap());
    let retries = Arc::new(
        RetryTracker::new(
            mem(),
            RetryPolicy {
                interval: Duration::hours(2),
                max_attempts: 3,
            },
        )
        .unwrap(),
    );
    let acquisition = Arc::new(AcquisitionService::new(
        Arc::new(DocumentCache::new()),
        Arc::clone(&documents),
        source,
        StdDuration::from_secs(5),
    ));

    let sink = Arc::new(Recorder::default());
    let mut distributor = Distributor::new();
    distributor.register(sink.clone());
    distributor.route("emma", "family-chat");
    for extra in extra_sinks {
        let name = extra.name().to_string();
        distributor.register(extra);
        distributor.route("emma", &name);
    }
    let distributor = Arc::new(distributor);

    let extraction = extractor.map(|ex| {
        Arc::new(ExtractionService::new(
            Arc::clone(&documents),
            Arc::clone(&reminders),
            ex,
            0.8,
            chrono::NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        ))
    });

    let subject = SubjectConfig {
        id: "emma".into(),
        name: Some("Emma".into()),
        sinks: Vec::new(),
    };
    let pipeline = Arc::new(DocumentPipeline::new(
        vec![subject],
        Arc::clone(&acquisition),
        Arc::clone(&retries),
        Arc::clone(&distributor),
        extraction,
    ));

    World {
        acquisition,
        documents,
        retries,
        reminders,
        distributor,
        sink,
        pipeline,
    }
}

fn week20() -> Period {
    Period::new(20, 2024).unwrap()
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 13, 8, 0, 0).unwrap()
}

// --- scenarios -------------------------------------------------------------

#[tokio::test]
async fn nothing_stored_and_no_remote_fetch_yields_empty() {
    let w = world(Portal::serving(Some("X")), None);

    let resolved = w
        .acquisition
        .resolve("emma", NaiveDate::from_ymd_opt(2024, 5, 15).unwrap(), false)
        .await
        .unwrap();

    assert_eq!(resolved, Resolved::Empty(week20()));
    assert_eq!(w.retries.attempts("emma", week20()).unwrap(), 0);
    assert!(w.retries.list().unwrap().is_empty());
}

#[tokio::test]
async fn unchanged_letter_is_announced_once() {
    let w = world(Portal::serving(Some("X")), None);

    let first = w.pipeline.check_subject("emma", week20(), t0()).await.unwrap();
    let second = w
        .pipeline
        .check_subject("emma", week20(), t0() + Duration::hours(1))
        .await
        .unwrap();

    assert_eq!(
        first,
        CheckOutcome::Announced {
            sinks: vec!["family-chat".into()]
        }
    );
    assert_eq!(second, CheckOutcome::Unchanged);

    let doc = w.documents.get("emma", week20()).unwrap().unwrap();
    assert_eq!(doc.content_hash, content_hash("X"));
    assert!(doc.is_posted_to("family-chat"));
    assert_eq!(w.sink.count(SignalKind::DocumentReady), 1);
    assert_eq!(w.documents.count().unwrap(), 1);
}

#[tokio::test]
async fn edited_letter_is_announced_again() {
    let portal = Portal::serving(Some("X"));
    let w = world(portal.clone(), None);

    w.pipeline.check_subject("emma", week20(), t0()).await.unwrap();
    *portal.text.lock().unwrap() = Some("X, now with a zoo trip".into());
    let outcome = w
        .pipeline
        .check_subject("emma", week20(), t0() + Duration::hours(1))
        .await
        .unwrap();

    assert!(matches!(outcome, CheckOutcome::Announced { .. }));
    assert_eq!(w.sink.count(SignalKind::DocumentReady), 2);
}

#[tokio::test]
async fn failed_sink_gets_the_letter_on_the_next_check() {
    let board = Flaky::down();
    let w = world_with(Portal::serving(Some("X")), None, vec![board.clone() as Arc<dyn Sink>]);

    let first = w.pipeline.check_subject("emma", week20(), t0()).await.unwrap();
    assert_eq!(
        first,
        CheckOutcome::Announced {
            sinks: vec!["family-chat".into()]
        }
    );
    let doc = w.documents.get("emma", week20()).unwrap().unwrap();
    assert!(doc.is_posted_to("family-chat"));
    assert!(!doc.is_posted_to("school-board"));

    board.down.store(false, Ordering::SeqCst);
    let second = w
        .pipeline
        .check_subject("emma", week20(), t0() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(
        second,
        CheckOutcome::Announced {
            sinks: vec!["school-board".into()]
        }
    );
    assert_eq!(w.sink.count(SignalKind::DocumentReady), 1);
    assert_eq!(board.delivered.load(Ordering::SeqCst), 1);

    let third = w
        .pipeline
        .check_subject("emma", week20(), t0() + Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(third, CheckOutcome::Unchanged);

    let cached = w
        .acquisition
        .resolve_period("emma", week20(), false)
        .await
        .unwrap();
    assert!(cached.document().unwrap().is_posted_to("school-board"));
}

#[tokio::test]
async fn check_and_sweep_in_one_tick_use_one_retry_slot() {
    let w = world(Arc::new(SlowOutage), None);
    w.pipeline.check_all(week20(), t0()).await;
    assert_eq!(w.retries.attempts("emma", week20()).unwrap(), 1);

    let due = t0() + Duration::hours(2);
    let (_, swept) = tokio::join!(w.pipeline.check_all(week20(), due), w.pipeline.sweep(due));

    assert_eq!(swept.unwrap(), 1);
    assert_eq!(w.retries.attempts("emma", week20()).unwrap(), 2);
    let record = w.retries.get("emma", week20()).unwrap().unwrap();
    assert_eq!(record.next_attempt, due + Duration::hours(2));
    assert!(!record.exhausted);
}

#[tokio::test]
async fn repeated_failures_exhaust_after_bound() {
    let w = world(Portal::serving(None), None);
    let check = |at: DateTime<Utc>| w.pipeline.check_subject("emma", week20(), at);

    assert_eq!(check(t0()).await.unwrap(), CheckOutcome::RetryPending { attempts: 1 });
    // Not due yet: the hourly document check leaves it alone.
    assert_eq!(check(t0() + Duration::hours(1)).await.unwrap(), CheckOutcome::Skipped);
    assert_eq!(
        check(t0() + Duration::hours(2)).await.unwrap(),
        CheckOutcome::RetryPending { attempts: 2 }
    );
    assert_eq!(
        check(t0() + Duration::hours(4)).await.unwrap(),
        CheckOutcome::RetryPending { attempts: 3 }
    );
    assert_eq!(w.sink.count(SignalKind::RetryScheduled), 1);

    assert_eq!(check(t0() + Duration::hours(6)).await.unwrap(), CheckOutcome::Exhausted);
    assert_eq!(w.retries.attempts("emma", week20()).unwrap(), 3);
    assert_eq!(w.sink.count(SignalKind::FetchExhausted), 1);

    assert_eq!(check(t0() + Duration::hours(8)).await.unwrap(), CheckOutcome::Skipped);
    assert_eq!(w.sink.count(SignalKind::FetchExhausted), 1);
    assert_eq!(w.documents.count().unwrap(), 0);
}

#[tokio::test]
async fn sweep_recovers_once_portal_returns() {
    let portal = Portal::serving(None);
    let w = world(portal.clone(), None);

    w.pipeline.check_subject("emma", week20(), t0()).await.unwrap();
    *portal.text.lock().unwrap() = Some("X".into());

    assert_eq!(w.pipeline.sweep(t0() + Duration::minutes(30)).await.unwrap(), 0);
    assert_eq!(w.pipeline.sweep(t0() + Duration::hours(2)).await.unwrap(), 1);

    assert!(w.retries.get("emma", week20()).unwrap().is_none());
    assert_eq!(
        w.sink.kinds(),
        vec![SignalKind::RetryScheduled, SignalKind::DocumentReady]
    );
}

#[tokio::test]
async fn blank_letter_is_not_a_failure() {
    let w = world(Portal::serving(Some("  \n")), None);

    let outcome = w.pipeline.check_subject("emma", week20(), t0()).await.unwrap();

    assert_eq!(outcome, CheckOutcome::NotPublished);
    assert_eq!(w.retries.attempts("emma", week20()).unwrap(), 0);
    assert!(w.sink.kinds().is_empty());
}

#[tokio::test]
async fn only_confident_events_become_reminders() {
    let event = |title: &str, confidence| CandidateEvent {
        kind: EventKind::PermissionForm,
        title: title.into(),
        description: String::new(),
        date: NaiveDate::from_ymd_opt(2024, 5, 16).unwrap(),
        confidence,
    };
    let extractor: Arc<dyn EventExtractor> =
        Arc::new(Canned(vec![event("Zoo form", 0.9), event("Bake sale?", 0.5)]));
    let w = world(Portal::serving(Some("X")), Some(extractor));

    w.pipeline.check_subject("emma", week20(), t0()).await.unwrap();
    // A second check on the same content must not extract again.
    w.pipeline
        .check_subject("emma", week20(), t0() + Duration::hours(1))
        .await
        .unwrap();

    let reminders = w.reminders.list(Some("emma"), true).unwrap();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].text, "Zoo form");
    assert_eq!(reminders[0].confidence, Some(0.9));
    assert!(w.documents.get("emma", week20()).unwrap().unwrap().auto_extracted);
}

#[tokio::test]
async fn overdue_reminder_is_delivered_once_at_startup() {
    let w = world(Portal::serving(None), None);
    let due = Local::now().naive_local() - Duration::minutes(135);
    let id = w
        .reminders
        .add_manual(&NewReminder::manual(
            "Return library books",
            due.date(),
            due.time(),
            Some("emma"),
        ))
        .unwrap()
        .id;

    let dispatcher = Arc::new(ReminderDispatcher::new(
        Arc::clone(&w.reminders),
        Arc::clone(&w.distributor),
    ));
    let jobs = Arc::new(JobStore::new(mem()).unwrap());
    let engine = SchedulerEngine::new(jobs, dispatcher, &SchedulerConfig::default());

    let recovered = engine.startup(Utc::now()).await.unwrap();
    let tick = engine.tick(Utc::now()).await.unwrap();

    assert_eq!(recovered.dispatched, 1);
    assert_eq!(tick.reminders.dispatched, 0);
    assert!(w.reminders.get(id).unwrap().unwrap().sent);

    let seen = w.sink.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].kind, SignalKind::MissedReminder);
    assert!(seen[0].title.contains("2h 15m"), "title was {}", seen[0].title);
}
