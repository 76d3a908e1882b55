//! Notification fan-out: the [`Sink`] trait, the per-subject [`Distributor`]
//! and the built-in webhook and log sinks.

pub mod distributor;
pub mod error;
pub mod log;
pub mod report;
pub mod sink;
pub mod webhook;

pub use distributor::Distributor;
pub use error::SinkError;
pub use log::LogSink;
pub use report::{DeliveryFailure, PublishReport};
pub use sink::Sink;
pub use webhook::WebhookSink;
