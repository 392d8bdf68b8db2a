use ironyard_core::{FilterProperties, NodeState};
use tracing::debug;

use super::Filter;

/// Passes nodes in the requested availability zone, or every node when no
/// zone was requested.
pub struct AvailabilityZoneFilter;

impl Filter for AvailabilityZoneFilter {
    fn name(&self) -> &'static str {
        "AvailabilityZoneFilter"
    }

    fn node_passes(&self, node: &NodeState, props: &FilterProperties) -> bool {
        let Some(requested) = props.request_spec.availability_zone.as_deref() else {
            return true;
        };
        let passes = node.availability_zone.as_deref() == Some(requested);
        if !passes {
            debug!(
                node = %node.uuid,
                zone = ?node.availability_zone,
                requested,
                "availability zone mismatch"
            );
        }
        passes
    }

    fn run_filter_once_per_request(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::node;

    fn in_zone(uuid: &str, zone: Option<&str>) -> NodeState {
        let mut n = node(uuid);
        n.availability_zone = zone.map(str::to_string);
        n
    }

    #[test]
    fn no_requested_zone_passes_everything() {
        let props = FilterProperties::default();
        for n in [in_zone("a", Some("az1")), in_zone("b", Some("az2")), in_zone("c", None)] {
            assert!(AvailabilityZoneFilter.node_passes(&n, &props));
        }
    }

    #[test]
    fn requested_zone_passes_exact_matches_only() {
        let mut props = FilterProperties::default();
        props.request_spec.availability_zone = Some("az1".to_string());

        assert!(AvailabilityZoneFilter.node_passes(&in_zone("a", Some("az1")), &props));
        assert!(!AvailabilityZoneFilter.node_passes(&in_zone("b", Some("az2")), &props));
        assert!(!AvailabilityZoneFilter.node_passes(&in_zone("c", None), &props));
    }
}
