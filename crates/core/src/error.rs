/// Error taxonomy for report computation.
///
/// The three kinds stay distinguishable all the way to the caller; only
/// catalog inconsistencies are absorbed into a degraded-but-valid report
/// (as `CatalogSkew` warnings), the other two abort the computation.
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Event store or step catalog fetch failed; never degraded to an empty report
    #[error("event source unavailable: {0}")]
    SourceUnavailable(String),

    /// An event's (step_rank, step_name) pair disagrees with the catalog
    #[error("step catalog inconsistency: {0}")]
    InconsistentCatalog(String),

    /// Rejected before any data fetch
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Warning-level diagnostic for events whose denormalized step name disagrees
/// with the catalog. Such events are excluded from name-keyed aggregates but
/// still counted wherever only the rank is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSkew {
    pub step_rank: u32,
    pub step_name: String,
    pub events: u64,
}
