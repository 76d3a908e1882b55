use async_trait::async_trait;
use tracing::info;
use weekletter_core::Notification;

use crate::{error::SinkError, sink::Sink};

/// Writes notifications to the tracing log. Useful as a fallback channel and
/// for running without any chat integration.
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        info!(
            sink = %self.name,
            kind = %notification.kind,
            subject = notification.subject.as_deref().unwrap_or("-"),
            title = %notification.title,
            "{}",
            notification.body
        );
        Ok(())
    }
}
