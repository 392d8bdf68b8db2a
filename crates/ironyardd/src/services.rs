//! Assembles the scheduler from configuration.

use std::sync::Arc;

use anyhow::Context;
use ironyard_core::SchedulerConfig;
use ironyard_placement::{HyperTransport, PlacementClient};
use ironyard_scheduler::{
    InventoryReporter, MemoryCatalog, NodeCache, NodeCacheUpdater, SchedulerCatalog,
    SchedulerManager, StaticNodeSource, load_driver,
};
use tracing::{info, warn};

/// Everything the daemon runs.
pub struct Services {
    pub manager: Arc<SchedulerManager>,
    pub updater: Arc<NodeCacheUpdater>,
}

pub fn build(config: &SchedulerConfig) -> anyhow::Result<Services> {
    config.validate()?;

    let transport = HyperTransport::new(
        &config.placement.endpoint,
        config.placement.auth_token.clone(),
        config.placement_timeout()?,
    );
    let placement = Arc::new(PlacementClient::new(Arc::new(transport)));
    info!(endpoint = %config.placement.endpoint, "placement client initialized");

    let catalog: Arc<dyn SchedulerCatalog> = match &config.seed.catalog {
        Some(path) => Arc::new(
            MemoryCatalog::from_file(path)
                .with_context(|| format!("loading catalog seed {}", path.display()))?,
        ),
        None => {
            warn!("no catalog seed configured, server groups and aggregates are empty");
            Arc::new(MemoryCatalog::new())
        }
    };

    let source = match &config.seed.nodes {
        Some(path) => StaticNodeSource::from_file(path)
            .with_context(|| format!("loading node seed {}", path.display()))?,
        None => {
            warn!("no node seed configured, the node list is empty");
            StaticNodeSource::default()
        }
    };

    let node_cache = Arc::new(NodeCache::new());
    let reporter = Arc::new(InventoryReporter::new(placement.clone()));
    let updater = NodeCacheUpdater::new(
        Arc::new(source),
        node_cache.clone(),
        config.node_refresh_interval()?,
    )
    .with_reporter(reporter);

    let driver = load_driver(&config.scheduler, placement, catalog, node_cache)?;
    info!(driver = %config.scheduler.driver, "scheduler driver loaded");

    Ok(Services {
        manager: Arc::new(SchedulerManager::new(driver)),
        updater: Arc::new(updater),
    })
}
