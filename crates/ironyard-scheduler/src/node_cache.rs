//! Node cache: periodically rebuilt snapshots of every bare-metal node.
//!
//! The filter scheduler reads [`NodeState`]s from here, never from the
//! placement service. A background [`NodeCacheUpdater`] pulls the node list
//! from a [`NodeSource`], swaps it in, and hands it to the
//! [`InventoryReporter`] so placement tracks the same set of nodes.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use ironyard_core::{NodeState, NodeUuid};
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::reporter::InventoryReporter;

/// Boxed future alias for node listings.
pub type NodeListFuture<'a> =
    Pin<Box<dyn Future<Output = SchedulerResult<Vec<NodeState>>> + Send + 'a>>;

/// Lists current nodes from the bare-metal driver.
pub trait NodeSource: Send + Sync {
    fn list_nodes(&self) -> NodeListFuture<'_>;
}

/// A node source backed by a fixed (but replaceable) list.
#[derive(Debug, Default)]
pub struct StaticNodeSource {
    nodes: RwLock<Vec<NodeState>>,
}

impl StaticNodeSource {
    pub fn new(nodes: Vec<NodeState>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Load a JSON array of node states.
    pub fn from_file(path: &Path) -> SchedulerResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SchedulerError::NodeSource(format!("read {}: {e}", path.display())))?;
        let nodes: Vec<NodeState> = serde_json::from_str(&content)
            .map_err(|e| SchedulerError::NodeSource(format!("parse {}: {e}", path.display())))?;
        Ok(Self::new(nodes))
    }

    pub fn set_nodes(&self, nodes: Vec<NodeState>) {
        *self.nodes.write().unwrap_or_else(PoisonError::into_inner) = nodes;
    }
}

impl NodeSource for StaticNodeSource {
    fn list_nodes(&self) -> NodeListFuture<'_> {
        let nodes = self
            .nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Box::pin(async move { Ok(nodes) })
    }
}

/// Latest node snapshots, keyed by UUID.
#[derive(Debug, Default)]
pub struct NodeCache {
    nodes: RwLock<HashMap<NodeUuid, NodeState>>,
    ready: AtomicBool,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every snapshot and mark the cache ready.
    pub fn replace(&self, nodes: Vec<NodeState>) {
        let map: HashMap<NodeUuid, NodeState> =
            nodes.into_iter().map(|n| (n.uuid.clone(), n)).collect();
        *self.nodes.write().unwrap_or_else(PoisonError::into_inner) = map;
        self.ready.store(true, Ordering::Release);
    }

    /// True once the first refresh has completed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn get(&self, uuid: &str) -> Option<NodeState> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.get(uuid).cloned()
    }

    /// Snapshots for `uuids` that are cached, in the given order.
    pub fn get_many(&self, uuids: &[NodeUuid]) -> Vec<NodeState> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        uuids.iter().filter_map(|u| nodes.get(u).cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps a [`NodeCache`] (and optionally placement) in step with a [`NodeSource`].
pub struct NodeCacheUpdater {
    source: Arc<dyn NodeSource>,
    cache: Arc<NodeCache>,
    reporter: Option<Arc<InventoryReporter>>,
    interval: Duration,
}

impl NodeCacheUpdater {
    pub fn new(source: Arc<dyn NodeSource>, cache: Arc<NodeCache>, interval: Duration) -> Self {
        Self {
            source,
            cache,
            reporter: None,
            interval,
        }
    }

    /// Report every refreshed node list to placement.
    pub fn with_reporter(mut self, reporter: Arc<InventoryReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Pull the node list once. A failed listing keeps the previous snapshots.
    pub async fn refresh(&self) -> SchedulerResult<usize> {
        let nodes = self.source.list_nodes().await?;
        let count = nodes.len();
        if let Some(reporter) = &self.reporter {
            let summary = reporter.report(&nodes).await;
            debug!(
                updated = summary.updated,
                failed = summary.failed,
                removed = summary.removed,
                "inventory reported"
            );
        }
        self.cache.replace(nodes);
        debug!(nodes = count, "node cache refreshed");
        Ok(count)
    }

    /// Refresh immediately, then every `interval` until shutdown.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "node cache updater started"
        );

        if let Err(e) = self.refresh().await {
            warn!(error = %e, "initial node refresh failed");
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "node refresh failed, keeping previous snapshot");
                    }
                }
                _ = shutdown.changed() => {
                    info!("node cache updater shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::node;

    struct FailingSource;

    impl NodeSource for FailingSource {
        fn list_nodes(&self) -> NodeListFuture<'_> {
            Box::pin(async { Err(SchedulerError::NodeSource("driver down".to_string())) })
        }
    }

    #[test]
    fn cache_becomes_ready_on_first_replace() {
        let cache = NodeCache::new();
        assert!(!cache.is_ready());
        cache.replace(Vec::new());
        assert!(cache.is_ready());
        assert!(cache.is_empty());
    }

    #[test]
    fn get_many_keeps_order_and_skips_unknown() {
        let cache = NodeCache::new();
        cache.replace(vec![node("a"), node("b")]);
        let got = cache.get_many(&["b".to_string(), "x".to_string(), "a".to_string()]);
        let uuids: Vec<&str> = got.iter().map(|n| n.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn refresh_replaces_snapshots() {
        let source = Arc::new(StaticNodeSource::new(vec![node("a"), node("b")]));
        let cache = Arc::new(NodeCache::new());
        let updater = NodeCacheUpdater::new(source.clone(), cache.clone(), Duration::from_secs(60));

        assert_eq!(updater.refresh().await.unwrap(), 2);
        assert!(cache.get("a").is_some());

        source.set_nodes(vec![node("b")]);
        updater.refresh().await.unwrap();
        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_cache_unready() {
        let cache = Arc::new(NodeCache::new());
        let updater =
            NodeCacheUpdater::new(Arc::new(FailingSource), cache.clone(), Duration::from_secs(60));
        assert!(updater.refresh().await.is_err());
        assert!(!cache.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn run_refreshes_until_shutdown() {
        let source = Arc::new(StaticNodeSource::new(vec![node("a")]));
        let cache = Arc::new(NodeCache::new());
        let updater = Arc::new(NodeCacheUpdater::new(
            source.clone(),
            cache.clone(),
            Duration::from_secs(10),
        ));
        let (tx, rx) = tokio::sync::watch::channel(false);

        let task = tokio::spawn({
            let updater = updater.clone();
            async move { updater.run(rx).await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(cache.is_ready());
        assert!(cache.get("a").is_some());

        source.set_nodes(vec![node("b")]);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(cache.get("b").is_some());

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
