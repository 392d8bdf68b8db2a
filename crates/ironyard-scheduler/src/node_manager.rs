//! Node manager: one filter pass, then one weigh pass.
//!
//! The configured filter and weigher names are resolved when the manager is
//! built, so a typo in configuration stops the scheduler from starting
//! instead of failing requests one by one. Requests may override either
//! list; overrides are resolved per call.

use std::sync::Arc;

use ironyard_core::config::SchedulerSection;
use ironyard_core::{FilterProperties, NodeState, WeightProperties};
use tracing::debug;

use crate::error::SchedulerResult;
use crate::filters::{Filter, resolve_filters};
use crate::weights::{WeighedNode, WeightHandler, Weigher, resolve_weighers};

/// Resolved filter and weigher pipelines plus the ranking strategy.
pub struct NodeManager {
    filters: Vec<Arc<dyn Filter>>,
    weighers: Vec<Arc<dyn Weigher>>,
    weight_handler: WeightHandler,
    config: SchedulerSection,
}

impl NodeManager {
    /// Create a manager from the configured pipelines.
    pub fn new(config: &SchedulerSection) -> SchedulerResult<Self> {
        let filters = resolve_filters(&config.default_filters)?;
        let weighers = resolve_weighers(&config.default_weighers, config)?;
        let weight_handler = WeightHandler::from_name(&config.weight_handler)?;
        debug!(
            filters = ?config.default_filters,
            weighers = ?config.default_weighers,
            weight_handler = %config.weight_handler,
            "node manager pipelines resolved"
        );
        Ok(Self {
            filters,
            weighers,
            weight_handler,
            config: config.clone(),
        })
    }

    fn filters_for(&self, props: &FilterProperties) -> SchedulerResult<Vec<Arc<dyn Filter>>> {
        match &props.filter_names {
            Some(names) => resolve_filters(names),
            None => Ok(self.filters.clone()),
        }
    }

    fn weighers_for(&self, props: &WeightProperties) -> SchedulerResult<Vec<Arc<dyn Weigher>>> {
        match &props.weigher_names {
            Some(names) => resolve_weighers(names, &self.config),
            None => Ok(self.weighers.clone()),
        }
    }

    /// Nodes passing every filter, in input order.
    ///
    /// `index` is the position of the server being placed within its
    /// request; once-per-request filters only run for index 0.
    pub fn get_filtered_nodes<'a>(
        &self,
        nodes: &'a [NodeState],
        props: &FilterProperties,
        index: usize,
    ) -> SchedulerResult<Vec<&'a NodeState>> {
        let filters = self.filters_for(props)?;
        let mut remaining: Vec<&'a NodeState> = nodes.iter().collect();
        for filter in filters.iter().filter(|f| f.run_filter_for_index(index)) {
            let before = remaining.len();
            remaining.retain(|node| filter.node_passes(node, props));
            debug!(
                filter = filter.name(),
                before,
                after = remaining.len(),
                "filter applied"
            );
            if remaining.is_empty() {
                break;
            }
        }
        Ok(remaining)
    }

    /// Rank `nodes`, best first.
    pub fn get_weighed_nodes<'a>(
        &self,
        nodes: Vec<&'a NodeState>,
        props: &WeightProperties,
    ) -> SchedulerResult<Vec<WeighedNode<'a>>> {
        let weighers = self.weighers_for(props)?;
        Ok(self.weight_handler.rank(&weighers, nodes, props))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;
    use crate::filters::test_support::{node, port};

    fn zoned(uuid: &str, zone: &str, ports: usize) -> NodeState {
        let mut n = node(uuid);
        n.availability_zone = Some(zone.to_string());
        n.ports = (0..ports).map(|_| port(None)).collect();
        n
    }

    #[test]
    fn rejects_unknown_configured_names() {
        let mut config = SchedulerSection::default();
        config.default_filters.push("NoSuchFilter".to_string());
        assert!(matches!(
            NodeManager::new(&config),
            Err(SchedulerError::FilterNotFound(_))
        ));

        let mut config = SchedulerSection::default();
        config.default_weighers = vec!["NoSuchWeigher".to_string()];
        assert!(matches!(
            NodeManager::new(&config),
            Err(SchedulerError::WeigherNotFound(_))
        ));

        let config = SchedulerSection {
            weight_handler: "random".to_string(),
            ..SchedulerSection::default()
        };
        assert!(matches!(
            NodeManager::new(&config),
            Err(SchedulerError::WeightHandlerNotFound(name)) if name == "random"
        ));
    }

    #[test]
    fn filters_then_weighs() {
        let manager = NodeManager::new(&SchedulerSection::default()).unwrap();
        let nodes = vec![zoned("a", "az1", 3), zoned("b", "az2", 1), zoned("c", "az1", 1)];
        let mut props = FilterProperties::default();
        props.request_spec.availability_zone = Some("az1".to_string());

        let filtered = manager.get_filtered_nodes(&nodes, &props, 0).unwrap();
        let uuids: Vec<&str> = filtered.iter().map(|n| n.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["a", "c"]);

        let weighed = manager.get_weighed_nodes(filtered, &props).unwrap();
        assert_eq!(weighed[0].node.uuid, "c");
    }

    #[test]
    fn zone_filter_skipped_after_first_index() {
        let manager = NodeManager::new(&SchedulerSection::default()).unwrap();
        let nodes = vec![zoned("a", "az1", 0), zoned("b", "az2", 0)];
        let mut props = FilterProperties::default();
        props.request_spec.availability_zone = Some("az1".to_string());

        assert_eq!(manager.get_filtered_nodes(&nodes, &props, 1).unwrap().len(), 2);
    }

    #[test]
    fn request_overrides_are_resolved_per_call() {
        let manager = NodeManager::new(&SchedulerSection::default()).unwrap();
        let nodes = vec![zoned("a", "az1", 0), zoned("b", "az2", 0)];
        let mut props = FilterProperties::default();
        props.request_spec.availability_zone = Some("az1".to_string());
        props.filter_names = Some(vec!["PortsFilter".to_string()]);

        assert_eq!(manager.get_filtered_nodes(&nodes, &props, 0).unwrap().len(), 2);

        props.weigher_names = Some(vec!["Bogus".to_string()]);
        let refs: Vec<&NodeState> = nodes.iter().collect();
        assert!(matches!(
            manager.get_weighed_nodes(refs, &props),
            Err(SchedulerError::WeigherNotFound(_))
        ));
    }
}
