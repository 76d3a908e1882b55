//! Acquisition and extraction services.
//!
//! [`AcquisitionService`] resolves a week letter through the in-process
//! [`DocumentCache`], then the Content Store, then the [`ContentSource`],
//! writing through on a successful fetch. [`ExtractionService`] turns stored
//! letters into reminders via an [`EventExtractor`].

pub mod acquisition;
pub mod anthropic;
pub mod cache;
pub mod error;
pub mod extraction;
pub mod extractor;
pub mod source;

pub use acquisition::{AcquisitionService, Refresh, Resolved};
pub use anthropic::AnthropicExtractor;
pub use cache::DocumentCache;
pub use error::{AcquisitionError, ExtractionError, SourceError};
pub use extraction::{ExtractionOutcome, ExtractionService};
pub use extractor::{CandidateEvent, EventExtractor};
pub use source::{ContentSource, FetchOutcome, HttpContentSource};
