//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur while building or running the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The expected outcome when nothing fits; never retried here.
    #[error("No valid node was found. {0}")]
    NoValidNode(String),

    #[error("filter not found: {0}")]
    FilterNotFound(String),

    #[error("weigher not found: {0}")]
    WeigherNotFound(String),

    #[error("weight handler not found: {0}")]
    WeightHandlerNotFound(String),

    #[error("unknown scheduler driver: {0}")]
    DriverNotFound(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("node source error: {0}")]
    NodeSource(String),

    #[error("placement error: {0}")]
    Placement(#[from] ironyard_placement::PlacementError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
