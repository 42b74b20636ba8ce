//! Purpose-based sub-pipelines and the router that feeds them.
//!
//! Exactly one sub-pipeline owns each classification. Ownership is enforced
//! twice: the router maps a class to its pipeline, and every pipeline
//! defensively rejects readings it does not own, so a routing bug surfaces
//! as an internal error instead of silent cross-class persistence.

pub mod alert;
pub mod guards;
pub mod prediction;
pub mod router;
pub mod warning;

use async_trait::async_trait;
use types::UnifiedReading;

use crate::error::Result;

pub use alert::AlertPipeline;
pub use prediction::PredictionPipeline;
pub use router::{IngestRouter, RouteOutcome};
pub use warning::WarningPipeline;

/// What a sub-pipeline did with a reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOutcome {
    pub persisted: bool,
    /// Bus publish happened (prediction pipeline only, post-persistence).
    pub published: bool,
    /// The series ended the ingest with no active alert or warning; the
    /// precondition for a recovery transition to NORMAL.
    pub resolved_all: bool,
    /// A pre-existing active record was superseded.
    pub superseded: bool,
}

/// One of the three mutually exclusive sub-pipelines.
#[async_trait]
pub trait SubPipeline: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this pipeline owns the reading's classification.
    fn accepts(&self, reading: &UnifiedReading) -> bool;

    /// Persist the reading per this pipeline's semantics. Must be called
    /// only through the router; rejects foreign classes with an internal
    /// error.
    async fn ingest(&self, reading: &UnifiedReading) -> Result<PipelineOutcome>;
}

/// Shared defensive check at the top of every `ingest`.
fn reject_foreign(pipeline: &dyn SubPipeline, reading: &UnifiedReading) -> Result<()> {
    if pipeline.accepts(reading) {
        Ok(())
    } else {
        Err(crate::error::GatewayError::internal(format!(
            "{} pipeline received {} ({}) for {}",
            pipeline.name(),
            reading.classification.as_str(),
            reading.reason.as_str(),
            reading.series_id(),
        )))
    }
}
