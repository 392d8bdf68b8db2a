//! Node filters.
//!
//! A filter is a predicate over one [`NodeState`] and the request's
//! [`FilterProperties`]. Filters are looked up by name in a static registry;
//! an unknown name is a configuration error, reported before any node is
//! evaluated.

use std::sync::Arc;

use ironyard_core::{FilterProperties, NodeState};

use crate::error::{SchedulerError, SchedulerResult};

pub mod availability_zone;
pub mod capabilities;
pub mod extra_specs_ops;
pub mod node_type;
pub mod ports;

pub use availability_zone::AvailabilityZoneFilter;
pub use capabilities::CapabilitiesFilter;
pub use node_type::NodeTypeFilter;
pub use ports::PortsFilter;

/// Accepts or rejects a node for a request.
pub trait Filter: Send + Sync {
    /// Registry name, as written in configuration.
    fn name(&self) -> &'static str;

    fn node_passes(&self, node: &NodeState, props: &FilterProperties) -> bool;

    /// The verdict only depends on the request, not on which server of a
    /// multi-server request is being placed.
    fn run_filter_once_per_request(&self) -> bool {
        false
    }

    /// Whether this filter participates in the pass for request `index`.
    fn run_filter_for_index(&self, index: usize) -> bool {
        !(self.run_filter_once_per_request() && index > 0)
    }
}

/// Every filter name this build knows about.
pub const AVAILABLE_FILTERS: &[&str] = &[
    "AvailabilityZoneFilter",
    "NodeTypeFilter",
    "CapabilitiesFilter",
    "PortsFilter",
];

fn filter_by_name(name: &str) -> Option<Arc<dyn Filter>> {
    let filter: Arc<dyn Filter> = match name {
        "AvailabilityZoneFilter" => Arc::new(AvailabilityZoneFilter),
        "NodeTypeFilter" => Arc::new(NodeTypeFilter),
        "CapabilitiesFilter" => Arc::new(CapabilitiesFilter),
        "PortsFilter" => Arc::new(PortsFilter),
        _ => return None,
    };
    Some(filter)
}

/// Resolve configured filter names, failing on the first unknown one.
pub fn resolve_filters(names: &[String]) -> SchedulerResult<Vec<Arc<dyn Filter>>> {
    names
        .iter()
        .map(|name| {
            filter_by_name(name).ok_or_else(|| SchedulerError::FilterNotFound(name.clone()))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use ironyard_core::{NodeState, PortInfo};

    pub fn node(uuid: &str) -> NodeState {
        NodeState {
            uuid: uuid.to_string(),
            name: format!("node-{uuid}"),
            availability_zone: None,
            node_type: None,
            resource_class: "CUSTOM_GOLD".to_string(),
            capabilities: serde_json::Map::new(),
            ports: Vec::new(),
            available: true,
        }
    }

    pub fn port(port_type: Option<&str>) -> PortInfo {
        PortInfo {
            address: "52:54:00:00:00:01".to_string(),
            port_type: port_type.map(str::to_string),
        }
    }
}
