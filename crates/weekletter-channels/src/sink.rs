use async_trait::async_trait;
use weekletter_core::Notification;

use crate::error::SinkError;

/// A notification channel (chat webhook, log, …).
///
/// Implementations must be `Send + Sync`; the [`Distributor`](crate::Distributor)
/// shares them across scheduler tasks.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Stable identifier, unique across registered sinks. Posted flags on
    /// stored documents are keyed by this name.
    fn name(&self) -> &str;

    /// Deliver one notification. The subject, if any, is
    /// `notification.subject`.
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError>;
}
