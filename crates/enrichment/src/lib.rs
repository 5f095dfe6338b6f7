//! Enrichment pipelines for FocusLens.
//!
//! Everything here is best-effort: the lookup service, the summary store, the
//! vision extractor and autonomous acquisition all degrade to "nothing new"
//! when their capability is missing or failing, and each generator is gated
//! by a per-subject backoff so repeated focus on one subject costs a bounded
//! number of calls.

pub mod acquisition;
pub mod backoff;
pub mod knowledge;
pub mod llm;
pub mod search;
pub mod vision;

#[cfg(test)]
mod testing;

pub use acquisition::{AutonomousAcquisition, DecayReport, DiscoveryReport, KnownTopic, ProcessReport};
pub use backoff::{BackoffEntry, BackoffPolicy, BackoffTable, FlightGuard, SingleFlight};
pub use knowledge::{SummaryStore, UpdateOutcome};
pub use llm::Generator;
pub use search::{EnrichmentService, SearchResults};
pub use vision::{VisionExtractor, VisionOutcome};
