use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};
use weekletter_channels::{Distributor, LogSink, Sink, WebhookSink};
use weekletter_core::{
    config::{SinkConfig, WeekletterConfig},
    Period,
};
use weekletter_pipeline::{
    AcquisitionService, AnthropicExtractor, ContentSource, DocumentCache, ExtractionService,
    FetchOutcome, HttpContentSource, SourceError,
};
use weekletter_scheduler::{
    DocumentCheckJob, DocumentPipeline, JobStore, ReminderDispatcher, RetrySweepJob,
    SchedulerEngine,
};
use weekletter_store::{DocumentStore, ReminderStore, RetryPolicy, RetryTracker};

/// Every subsystem, wired from config. Each store gets its own connection
/// to the same database file.
pub struct App {
    pub config: WeekletterConfig,
    pub documents: Arc<DocumentStore>,
    pub reminders: Arc<ReminderStore>,
    pub retries: Arc<RetryTracker>,
    pub jobs: Arc<JobStore>,
    pub distributor: Arc<Distributor>,
    pub acquisition: Arc<AcquisitionService>,
    pub extraction: Option<Arc<ExtractionService>>,
}

impl App {
    pub fn open(config: WeekletterConfig) -> anyhow::Result<Self> {
        let db_path = config.database.path.clone();
        ensure_parent_dir(&db_path);
        info!(path = %db_path, "opening SQLite database");

        let documents = Arc::new(DocumentStore::new(open_conn(&db_path)?)?);
        let reminders = Arc::new(ReminderStore::new(open_conn(&db_path)?)?);
        let retries = Arc::new(RetryTracker::new(
            open_conn(&db_path)?,
            RetryPolicy::from(&config.retry),
        )?);
        let jobs = Arc::new(JobStore::new(open_conn(&db_path)?)?);
        info!("database migrations complete");

        let distributor = Arc::new(build_distributor(&config)?);
        let acquisition = Arc::new(AcquisitionService::new(
            Arc::new(DocumentCache::new()),
            Arc::clone(&documents),
            build_source(&config),
            Duration::from_secs(config.scheduler.fetch_timeout_secs),
        ));
        let extraction = build_extraction(&config, &documents, &reminders);

        Ok(Self {
            config,
            documents,
            reminders,
            retries,
            jobs,
            distributor,
            acquisition,
            extraction,
        })
    }

    pub fn pipeline(&self) -> Arc<DocumentPipeline> {
        Arc::new(DocumentPipeline::new(
            self.config.subjects.clone(),
            Arc::clone(&self.acquisition),
            Arc::clone(&self.retries),
            Arc::clone(&self.distributor),
            self.extraction.clone(),
        ))
    }

    /// Scheduler engine with `document-check` and `retry-sweep` registered.
    pub fn engine(&self) -> anyhow::Result<SchedulerEngine> {
        let dispatcher = Arc::new(ReminderDispatcher::new(
            Arc::clone(&self.reminders),
            Arc::clone(&self.distributor),
        ));
        let mut engine = SchedulerEngine::new(Arc::clone(&self.jobs), dispatcher, &self.config.scheduler);

        let pipeline = self.pipeline();
        let now = Utc::now();
        let sched = &self.config.scheduler;
        engine
            .register(Arc::new(DocumentCheckJob::new(Arc::clone(&pipeline))), &sched.document_check_cron, now)
            .context("document-check schedule")?;
        engine
            .register(Arc::new(RetrySweepJob::new(pipeline)), &sched.retry_sweep_cron, now)
            .context("retry-sweep schedule")?;
        Ok(engine)
    }

    /// Fail with a readable message for subjects missing from config.
    pub fn require_subject(&self, id: &str) -> anyhow::Result<()> {
        match self.config.subject(id) {
            Some(_) => Ok(()),
            None => anyhow::bail!(weekletter_core::WeekletterError::UnknownSubject { id: id.to_string() }),
        }
    }
}

fn open_conn(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path).with_context(|| format!("opening {path}"))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

fn build_distributor(config: &WeekletterConfig) -> anyhow::Result<Distributor> {
    let mut distributor = Distributor::new();
    let mut registered = HashSet::new();

    for subject in &config.subjects {
        for sink_cfg in &subject.sinks {
            let name = sink_cfg.name();
            if registered.insert(name.to_string()) {
                let sink: Arc<dyn Sink> = match sink_cfg {
                    SinkConfig::Webhook { name, url } => Arc::new(
                        WebhookSink::new(name, url).with_context(|| format!("sink {name}"))?,
                    ),
                    SinkConfig::Log { name } => Arc::new(LogSink::new(name)),
                };
                distributor.register(sink);
            }
            distributor.route(&subject.id, name);
        }
        if subject.sinks.is_empty() {
            warn!(subject = %subject.id, "subject has no sinks; its notifications go nowhere");
        }
    }
    Ok(distributor)
}

fn build_source(config: &WeekletterConfig) -> Arc<dyn ContentSource> {
    match &config.source.base_url {
        Some(url) => {
            info!(%url, "content source: HTTP");
            Arc::new(HttpContentSource::new(url, config.source.token.clone()))
        }
        None => {
            warn!("no source.base_url configured; remote fetches will fail");
            Arc::new(UnconfiguredSource)
        }
    }
}

fn build_extraction(
    config: &WeekletterConfig,
    documents: &Arc<DocumentStore>,
    reminders: &Arc<ReminderStore>,
) -> Option<Arc<ExtractionService>> {
    let cfg = &config.extraction;
    if !cfg.enabled {
        info!("event extraction disabled");
        return None;
    }
    let Some(api_key) = cfg.api_key.clone() else {
        warn!("extraction.api_key not set; event extraction disabled");
        return None;
    };
    info!(model = %cfg.model, "event extraction: Anthropic");
    let extractor = AnthropicExtractor::new(api_key, Some(cfg.base_url.clone()), cfg.model.clone());
    Some(Arc::new(ExtractionService::new(
        Arc::clone(documents),
        Arc::clone(reminders),
        Arc::new(extractor),
        cfg.confidence_threshold,
        cfg.reminder_time,
    )))
}

/// Stand-in when no upstream is configured. Every fetch is a failure so the
/// retry accounting surfaces the misconfiguration.
struct UnconfiguredSource;

#[async_trait]
impl ContentSource for UnconfiguredSource {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn fetch(&self, _subject: &str, _period: Period) -> Result<FetchOutcome, SourceError> {
        Err(SourceError::Unavailable(
            "no source configured; set source.base_url in weekletter.toml".into(),
        ))
    }
}
