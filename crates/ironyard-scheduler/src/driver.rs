//! Scheduler driver seam.
//!
//! The RPC facade only talks to a [`SchedulerDriver`]. Which implementation
//! backs it is chosen by `scheduler.driver` in configuration.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use ironyard_core::config::SchedulerSection;
use ironyard_core::{FilterProperties, NodeUuid};
use ironyard_placement::PlacementClient;

use crate::catalog::SchedulerCatalog;
use crate::error::{SchedulerError, SchedulerResult};
use crate::filter_scheduler::FilterScheduler;
use crate::node_cache::NodeCache;

/// Boxed future alias for a scheduling decision.
pub type ScheduleFuture<'a> =
    Pin<Box<dyn Future<Output = SchedulerResult<Vec<NodeUuid>>> + Send + 'a>>;

pub trait SchedulerDriver: Send + Sync {
    /// False until the driver has node data to schedule against.
    fn is_ready(&self) -> bool;

    /// Pick one node per server in `props.request_spec`.
    fn select_destinations<'a>(&'a self, props: &'a mut FilterProperties) -> ScheduleFuture<'a>;
}

impl SchedulerDriver for FilterScheduler {
    fn is_ready(&self) -> bool {
        FilterScheduler::is_ready(self)
    }

    fn select_destinations<'a>(&'a self, props: &'a mut FilterProperties) -> ScheduleFuture<'a> {
        Box::pin(self.schedule(props))
    }
}

/// Build the driver named by `config.driver`.
pub fn load_driver(
    config: &SchedulerSection,
    placement: Arc<PlacementClient>,
    catalog: Arc<dyn SchedulerCatalog>,
    node_cache: Arc<NodeCache>,
) -> SchedulerResult<Arc<dyn SchedulerDriver>> {
    match config.driver.as_str() {
        "filter_scheduler" => Ok(Arc::new(FilterScheduler::new(
            config, placement, catalog, node_cache,
        )?)),
        other => Err(SchedulerError::DriverNotFound(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use ironyard_placement::FakePlacement;

    fn parts() -> (Arc<PlacementClient>, Arc<dyn SchedulerCatalog>, Arc<NodeCache>) {
        (
            Arc::new(PlacementClient::new(Arc::new(FakePlacement::new()))),
            Arc::new(MemoryCatalog::new()),
            Arc::new(NodeCache::new()),
        )
    }

    #[test]
    fn loads_filter_scheduler() {
        let (placement, catalog, cache) = parts();
        let driver = load_driver(&SchedulerSection::default(), placement, catalog, cache.clone());
        let Ok(driver) = driver else {
            panic!("filter_scheduler should load");
        };
        assert!(!driver.is_ready());
        cache.replace(Vec::new());
        assert!(driver.is_ready());
    }

    #[test]
    fn unknown_driver_is_rejected() {
        let (placement, catalog, cache) = parts();
        let config = SchedulerSection {
            driver: "chance_scheduler".to_string(),
            ..SchedulerSection::default()
        };
        assert!(matches!(
            load_driver(&config, placement, catalog, cache),
            Err(SchedulerError::DriverNotFound(name)) if name == "chance_scheduler"
        ));
    }
}
