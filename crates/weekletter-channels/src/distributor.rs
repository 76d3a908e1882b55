use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use weekletter_core::Notification;

use crate::{
    error::SinkError,
    report::{DeliveryFailure, PublishReport},
    sink::Sink,
};

/// Upper bound on a single sink delivery.
const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);
/// Ordering key used for publishes that have no subject.
const BROADCAST_KEY: &str = "*";

/// Distribution Layer: routes notifications to the sinks registered for a
/// subject.
///
/// Sinks for one publish are driven concurrently and fail independently.
/// Publishes for the same subject are serialized, so every sink sees a
/// subject's notifications in the order they were published.
pub struct Distributor {
    sinks: HashMap<String, Arc<dyn Sink>>,
    routes: HashMap<String, Vec<String>>,
    order: DashMap<String, Arc<Mutex<()>>>,
    delivery_timeout: Duration,
}

impl Distributor {
    pub fn new() -> Self {
        Self {
            sinks: HashMap::new(),
            routes: HashMap::new(),
            order: DashMap::new(),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Register a sink. A sink with the same name is replaced.
    pub fn register(&mut self, sink: Arc<dyn Sink>) {
        let name = sink.name().to_string();
        info!(sink = %name, "registering sink");
        self.sinks.insert(name, sink);
    }

    /// Route `subject`'s notifications to the sink called `sink_name`.
    pub fn route(&mut self, subject: &str, sink_name: &str) {
        let names = self.routes.entry(subject.to_string()).or_default();
        if !names.iter().any(|n| n == sink_name) {
            names.push(sink_name.to_string());
        }
    }

    /// Names of the sinks routed for `subject`, in registration order.
    pub fn sink_names(&self, subject: &str) -> Vec<String> {
        self.routes
            .get(subject)
            .map(|names| {
                names
                    .iter()
                    .filter(|n| self.sinks.contains_key(n.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Deliver to every sink routed for `subject`.
    pub async fn publish(&self, subject: &str, notification: &Notification) -> PublishReport {
        let names = self.sink_names(subject);
        self.deliver_ordered(subject, &names, notification).await
    }

    /// Deliver only to the routed sinks whose names are in `only`.
    pub async fn publish_to(
        &self,
        subject: &str,
        notification: &Notification,
        only: &[String],
    ) -> PublishReport {
        let names: Vec<String> = self
            .sink_names(subject)
            .into_iter()
            .filter(|n| only.contains(n))
            .collect();
        self.deliver_ordered(subject, &names, notification).await
    }

    /// Deliver to every registered sink once, regardless of routing.
    pub async fn broadcast(&self, notification: &Notification) -> PublishReport {
        let mut names: Vec<String> = self.sinks.keys().cloned().collect();
        names.sort();
        self.deliver_ordered(BROADCAST_KEY, &names, notification).await
    }

    async fn deliver_ordered(
        &self,
        key: &str,
        names: &[String],
        notification: &Notification,
    ) -> PublishReport {
        if names.is_empty() {
            warn!(subject = %key, kind = %notification.kind, "no sinks to deliver to");
            return PublishReport::default();
        }

        let gate = self
            .order
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _ordered = gate.lock().await;

        let deliveries = names.iter().filter_map(|name| {
            let sink = self.sinks.get(name)?;
            Some(async move { (name.clone(), self.deliver_one(sink.as_ref(), notification).await) })
        });

        let mut report = PublishReport::default();
        for (name, result) in join_all(deliveries).await {
            match result {
                Ok(()) => report.delivered.push(name),
                Err(e) => {
                    warn!(sink = %name, subject = %key, kind = %notification.kind, error = %e, "delivery failed");
                    report.failed.push(DeliveryFailure {
                        sink: name,
                        error: e.to_string(),
                    });
                }
            }
        }
        debug!(
            subject = %key,
            kind = %notification.kind,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "publish complete"
        );
        report
    }

    async fn deliver_one(&self, sink: &dyn Sink, notification: &Notification) -> Result<(), SinkError> {
        match tokio::time::timeout(self.delivery_timeout, sink.deliver(notification)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout {
                ms: self.delivery_timeout.as_millis() as u64,
            }),
        }
    }
}

impl Default for Distributor {
    fn default() -> Self {
        Self::new()
    }
}
