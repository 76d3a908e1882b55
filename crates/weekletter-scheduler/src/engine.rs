use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use weekletter_core::config::SchedulerConfig;

use crate::{
    dispatch::{DispatchReport, ReminderDispatcher},
    error::{Result, SchedulerError},
    handler::JobHandler,
    jobs::JobStore,
    types::{Readiness, ScheduledJob},
};

/// What one [`SchedulerEngine::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Another tick was still in flight; nothing ran.
    pub skipped: bool,
    pub reminders: DispatchReport,
    /// Jobs executed during this tick.
    pub ran: Vec<String>,
    /// Jobs found past their execution window and moved forward.
    pub missed: Vec<String>,
}

enum TaskResult {
    Reminders(Result<DispatchReport>),
    Job(String, Result<()>),
}

/// Core scheduler: one periodic tick drives reminder dispatch and the named
/// cron jobs.
pub struct SchedulerEngine {
    jobs: Arc<JobStore>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    dispatcher: Arc<ReminderDispatcher>,
    tick_interval: std::time::Duration,
    execution_window: chrono::Duration,
    in_flight: Mutex<()>,
}

impl SchedulerEngine {
    pub fn new(jobs: Arc<JobStore>, dispatcher: Arc<ReminderDispatcher>, config: &SchedulerConfig) -> Self {
        Self {
            jobs,
            handlers: HashMap::new(),
            dispatcher,
            tick_interval: std::time::Duration::from_secs(config.tick_interval_secs.max(1)),
            execution_window: chrono::Duration::seconds(config.execution_window_secs as i64),
            in_flight: Mutex::new(()),
        }
    }

    /// Register `handler` under `cron`, creating or updating its job row.
    pub fn register(
        &mut self,
        handler: Arc<dyn JobHandler>,
        cron: &str,
        now: DateTime<Utc>,
    ) -> Result<ScheduledJob> {
        let job = self.jobs.upsert_job(handler.name(), cron, now)?;
        self.handlers.insert(job.name.clone(), handler);
        Ok(job)
    }

    /// Startup recovery: advance stale jobs and deliver every overdue
    /// reminder as missed.
    pub async fn startup(&self, now: DateTime<Utc>) -> Result<DispatchReport> {
        let advanced = self.jobs.recover(now)?;
        if advanced > 0 {
            info!(advanced, "stale jobs rescheduled");
        }
        self.dispatcher
            .recover_missed(now.with_timezone(&Local).naive_local())
            .await
    }

    /// Run one scheduler pass at `now`.
    ///
    /// Single flight: if a previous tick is still running this returns
    /// immediately with `skipped` set.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("previous tick still running, skipping");
            return Ok(TickReport {
                skipped: true,
                ..Default::default()
            });
        };

        let mut report = TickReport::default();
        let mut tasks = JoinSet::new();

        let dispatcher = Arc::clone(&self.dispatcher);
        let local_now = now.with_timezone(&Local).naive_local();
        tasks.spawn(async move { TaskResult::Reminders(dispatcher.dispatch_due(local_now).await) });

        // A list failure is reported only after every spawned task drains.
        let listed = self.jobs.list().map(|jobs| {
            for job in jobs {
                let name = job.name.clone();
                if let Err(e) = self.start(job, now, &mut tasks, &mut report) {
                    error!(job = %name, "could not start job: {e}");
                }
            }
        });

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(TaskResult::Reminders(Ok(r))) => report.reminders = r,
                Ok(TaskResult::Reminders(Err(e))) => error!("reminder dispatch failed: {e}"),
                Ok(TaskResult::Job(name, Err(e))) => error!(job = %name, "job failed: {e}"),
                Ok(TaskResult::Job(_, Ok(()))) => {}
                Err(e) => error!("scheduler task panicked: {e}"),
            }
        }
        listed.map(|_| report)
    }

    fn start(
        &self,
        job: ScheduledJob,
        now: DateTime<Utc>,
        tasks: &mut JoinSet<TaskResult>,
        report: &mut TickReport,
    ) -> Result<()> {
        let Some(handler) = self.handlers.get(&job.name) else {
            debug!(job = %job.name, "no handler registered");
            return Ok(());
        };
        match job.readiness(now, self.execution_window) {
            Readiness::Waiting | Readiness::Blocked => {}
            Readiness::Missed => {
                let next = self.jobs.reschedule(&job.name, now)?;
                warn!(job = %job.name, due = %job.next_run, %next, "execution window missed, skipping");
                report.missed.push(job.name);
            }
            Readiness::Due => {
                if !self.jobs.mark_running(&job.name, now)? {
                    return Ok(());
                }
                info!(job = %job.name, run = job.run_count + 1, "executing job");
                let handler = Arc::clone(handler);
                let jobs = Arc::clone(&self.jobs);
                let name = job.name.clone();
                tasks.spawn(async move {
                    // The handler runs in its own task so a panic still
                    // reaches `record_run` and the job is released.
                    let outcome = match tokio::spawn(async move { handler.run(now).await }).await {
                        Ok(outcome) => outcome,
                        Err(e) => Err(SchedulerError::JobPanicked {
                            name: name.clone(),
                            reason: e.to_string(),
                        }),
                    };
                    let recorded = jobs.record_run(&name, now).map(|_| ());
                    TaskResult::Job(name, outcome.and(recorded))
                });
                report.ran.push(job.name);
            }
        }
        Ok(())
    }

    /// Main loop. Ticks every `tick_interval` until `shutdown` broadcasts
    /// `true`; an in-flight tick always completes first.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.tick_interval, "scheduler engine started");
        if let Err(e) = self.startup(Utc::now()).await {
            error!("scheduler startup recovery failed: {e}");
        }

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use rusqlite::Connection;
    use tokio::sync::Notify;
    use weekletter_channels::Distributor;
    use weekletter_store::ReminderStore;

    use super::*;
    use crate::types::JobStatus;

    const EVERY_MINUTE: &str = "0 * * * * *";

    struct Counting {
        runs: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl JobHandler for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run(&self, _: DateTime<Utc>) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(())
        }
    }

    fn engine(gate: Option<Arc<Notify>>) -> (SchedulerEngine, Arc<Counting>, ScheduledJob) {
        let jobs = Arc::new(JobStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let reminders = Arc::new(ReminderStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let dispatcher = Arc::new(ReminderDispatcher::new(reminders, Arc::new(Distributor::new())));
        let mut engine = SchedulerEngine::new(jobs, dispatcher, &SchedulerConfig::default());
        let handler = Arc::new(Counting {
            runs: AtomicUsize::new(0),
            gate,
        });
        let job = engine.register(handler.clone(), EVERY_MINUTE, Utc::now()).unwrap();
        (engine, handler, job)
    }

    #[tokio::test]
    async fn due_job_runs_and_is_rescheduled() {
        let (engine, handler, job) = engine(None);

        let early = engine.tick(job.next_run - Duration::seconds(1)).await.unwrap();
        assert!(early.ran.is_empty());

        let report = engine.tick(job.next_run).await.unwrap();
        assert_eq!(report.ran, vec!["counting".to_string()]);
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);

        let after = engine.jobs.get("counting").unwrap().unwrap();
        assert_eq!(after.run_count, 1);
        assert_eq!(after.next_run, job.next_run + Duration::minutes(1));
    }

    #[tokio::test]
    async fn job_past_window_is_skipped() {
        let (engine, handler, job) = engine(None);

        let late = job.next_run + Duration::seconds(90);
        let report = engine.tick(late).await.unwrap();

        assert!(report.ran.is_empty());
        assert_eq!(report.missed, vec!["counting".to_string()]);
        assert_eq!(handler.runs.load(Ordering::SeqCst), 0);
        let after = engine.jobs.get("counting").unwrap().unwrap();
        assert!(after.next_run > late);
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let gate = Arc::new(Notify::new());
        let (engine, handler, job) = engine(Some(Arc::clone(&gate)));
        let engine = Arc::new(engine);

        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.tick(job.next_run).await })
        };
        while handler.runs.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let second = engine.tick(job.next_run).await.unwrap();
        assert!(second.skipped);

        gate.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(!first.skipped);
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_job_does_not_run() {
        let (engine, handler, job) = engine(None);
        engine.jobs.set_enabled("counting", false).unwrap();

        engine.tick(job.next_run).await.unwrap();
        assert_eq!(handler.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (engine, _, _) = engine(None);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::new(engine).run(rx));
        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    struct Exploding;

    #[async_trait]
    impl JobHandler for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        async fn run(&self, _: DateTime<Utc>) -> Result<()> {
            panic!("handler bug");
        }
    }

    struct Stale;

    #[async_trait]
    impl JobHandler for Stale {
        fn name(&self) -> &str {
            "archive"
        }

        async fn run(&self, _: DateTime<Utc>) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn panicking_job_is_released_and_rescheduled() {
        let (mut engine, _, _) = engine(None);
        let job = engine
            .register(Arc::new(Exploding), EVERY_MINUTE, Utc::now())
            .unwrap();

        let report = engine.tick(job.next_run).await.unwrap();
        assert!(report.ran.contains(&"exploding".to_string()));

        let after = engine.jobs.get("exploding").unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Idle);
        assert_eq!(after.next_run, job.next_run + Duration::minutes(1));
        assert_eq!(
            after.readiness(after.next_run, engine.execution_window),
            Readiness::Due
        );
    }

    #[tokio::test]
    async fn broken_job_does_not_stop_the_others() {
        let (mut engine, handler, job) = engine(None);
        // Fires once in 2020 and never again, so rescheduling it fails.
        let registered_at = Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap();
        engine
            .register(Arc::new(Stale), "0 0 0 1 1 * 2020", registered_at)
            .unwrap();

        let report = engine.tick(job.next_run).await.unwrap();

        assert_eq!(report.ran, vec!["counting".to_string()]);
        assert!(report.missed.is_empty());
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
        assert_eq!(engine.jobs.get("counting").unwrap().unwrap().run_count, 1);
    }
}
