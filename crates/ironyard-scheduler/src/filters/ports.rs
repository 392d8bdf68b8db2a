use std::collections::HashMap;

use ironyard_core::{FilterProperties, NodeState};
use tracing::debug;

use super::Filter;

/// Passes nodes with enough ports for every requested network.
///
/// A network that names a port type needs a port of that type; each port
/// serves one network.
pub struct PortsFilter;

impl Filter for PortsFilter {
    fn name(&self) -> &'static str {
        "PortsFilter"
    }

    fn node_passes(&self, node: &NodeState, props: &FilterProperties) -> bool {
        let networks = &props.request_spec.requested_networks;
        if node.ports.len() < networks.len() {
            debug!(node = %node.uuid, ports = node.ports.len(), wanted = networks.len(), "not enough ports");
            return false;
        }

        let mut wanted: HashMap<&str, usize> = HashMap::new();
        for port_type in networks.iter().filter_map(|n| n.port_type.as_deref()) {
            *wanted.entry(port_type).or_default() += 1;
        }
        for (port_type, count) in wanted {
            let available = node
                .ports
                .iter()
                .filter(|p| p.port_type.as_deref() == Some(port_type))
                .count();
            if available < count {
                debug!(node = %node.uuid, port_type, available, wanted = count, "missing port type");
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::{node, port};
    use ironyard_core::RequestedNetwork;

    fn props(types: &[Option<&str>]) -> FilterProperties {
        let mut props = FilterProperties::default();
        props.request_spec.requested_networks = types
            .iter()
            .map(|t| RequestedNetwork {
                uuid: None,
                port_type: t.map(str::to_string),
            })
            .collect();
        props
    }

    #[test]
    fn no_networks_passes_portless_nodes() {
        assert!(PortsFilter.node_passes(&node("a"), &props(&[])));
    }

    #[test]
    fn port_count_must_cover_networks() {
        let mut n = node("a");
        n.ports = vec![port(None)];
        assert!(PortsFilter.node_passes(&n, &props(&[None])));
        assert!(!PortsFilter.node_passes(&n, &props(&[None, None])));
    }

    #[test]
    fn requested_port_types_must_exist() {
        let mut n = node("a");
        n.ports = vec![port(Some("10GE")), port(Some("1GE"))];
        assert!(PortsFilter.node_passes(&n, &props(&[Some("10GE"), None])));
        assert!(!PortsFilter.node_passes(&n, &props(&[Some("40GE")])));
        assert!(!PortsFilter.node_passes(&n, &props(&[Some("10GE"), Some("10GE")])));
    }
}
