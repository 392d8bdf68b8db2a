//! ironyard-placement — client for the placement tracking service.
//!
//! Every bare-metal node is mirrored in placement as a resource provider
//! with an inventory (usually one unit of the node's custom resource
//! class) and a set of aggregate memberships. Servers placed on a node
//! become allocations against its provider.
//!
//! # Architecture
//!
//! ```text
//! PlacementClient
//!   ├── PlacementTransport (HyperTransport in production, FakePlacement in tests)
//!   └── ProviderCache (provider generations, aggregates, known classes)
//! ```
//!
//! Writes are generation-gated: a stale generation yields a conflict,
//! which evicts the cached provider and retries a bounded number of times.

pub mod cache;
pub mod client;
pub mod error;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod resource_class;
pub mod transport;
pub mod types;

pub use cache::ProviderCache;
pub use client::{INVENTORY_RETRY_DELAY, INVENTORY_UPDATE_ATTEMPTS, PlacementClient};
pub use error::{PlacementError, PlacementResult};
#[cfg(any(test, feature = "fake"))]
pub use fake::FakePlacement;
pub use transport::{HyperTransport, PlacementRequest, PlacementResponse, PlacementTransport};
pub use types::{
    AggregateAction, ConsumerResources, Inventory, InventoryPayload, InventoryRecord,
    ProviderAllocations, ProviderFilters, ResourceProvider,
};
