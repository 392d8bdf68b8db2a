//! ironyard-scheduler — bare-metal node selection.
//!
//! Turns a request for N servers into N node UUIDs. The scheduler:
//!
//! - Asks placement which nodes have the requested resources free
//! - Narrows them by aggregate constraints and server-group zones
//! - Runs the filter pipeline over cached node snapshots, then weighs them
//! - Claims the chosen nodes by writing allocations to placement
//!
//! # Architecture
//!
//! ```text
//! SchedulerManager (RPC facade: version check, readiness wait)
//!   └── SchedulerDriver
//!       └── FilterScheduler
//!           ├── PlacementClient (candidates, aggregates, allocations)
//!           ├── SchedulerCatalog (server groups, aggregate metadata)
//!           ├── NodeCache ← NodeCacheUpdater ← NodeSource
//!           │                     └── InventoryReporter → PlacementClient
//!           └── NodeManager
//!               ├── filters (availability zone, node type, capabilities, ports)
//!               └── weights (ports)
//! ```

pub mod catalog;
pub mod driver;
pub mod error;
pub mod filter_scheduler;
pub mod filters;
pub mod manager;
pub mod node_cache;
pub mod node_manager;
pub mod reporter;
pub mod weights;

pub use catalog::{MemoryCatalog, SchedulerCatalog};
pub use driver::{SchedulerDriver, load_driver};
pub use error::{SchedulerError, SchedulerResult};
pub use filter_scheduler::FilterScheduler;
pub use manager::{RPC_API_VERSION, RpcError, SchedulerManager};
pub use node_cache::{NodeCache, NodeCacheUpdater, NodeSource, StaticNodeSource};
pub use node_manager::NodeManager;
pub use reporter::InventoryReporter;
