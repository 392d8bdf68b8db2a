//! Error types for the placement tracking client.

use thiserror::Error;

/// Result type alias for placement client operations.
pub type PlacementResult<T> = Result<T, PlacementError>;

/// Errors surfaced by the placement client.
///
/// Transport and auth failures are mostly logged and degraded to "no data"
/// by the client itself; only the variants below reach callers.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// The request never produced an HTTP response.
    #[error("placement unreachable: {0}")]
    Transport(String),

    /// The service answered with a status the caller cannot act on.
    #[error("placement returned {status} for {method} {path}: {detail}")]
    UnexpectedStatus {
        method: String,
        path: String,
        status: u16,
        detail: String,
    },

    #[error("invalid response body: {0}")]
    Decode(String),

    /// An inventory write touched resource classes that still have allocations.
    #[error("inventory for {resource_classes} on resource provider {provider} in use")]
    InventoryInUse {
        resource_classes: String,
        provider: String,
    },

    #[error("invalid resource class {name}: {reason}")]
    InvalidResourceClass { name: String, reason: String },

    #[error("no resource provider for node {0}")]
    NodeNotFound(String),
}
