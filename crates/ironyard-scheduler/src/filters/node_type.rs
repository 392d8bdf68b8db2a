use ironyard_core::{FilterProperties, NodeState};

use super::Filter;

/// Passes nodes whose declared type matches the requested one.
pub struct NodeTypeFilter;

impl Filter for NodeTypeFilter {
    fn name(&self) -> &'static str {
        "NodeTypeFilter"
    }

    fn node_passes(&self, node: &NodeState, props: &FilterProperties) -> bool {
        match props.request_spec.node_type.as_deref() {
            None => true,
            Some(requested) => node.node_type.as_deref() == Some(requested),
        }
    }

    fn run_filter_once_per_request(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::node;

    #[test]
    fn matches_requested_type() {
        let mut gold = node("a");
        gold.node_type = Some("gold".to_string());
        let untyped = node("b");

        let mut props = FilterProperties::default();
        assert!(NodeTypeFilter.node_passes(&gold, &props));
        assert!(NodeTypeFilter.node_passes(&untyped, &props));

        props.request_spec.node_type = Some("gold".to_string());
        assert!(NodeTypeFilter.node_passes(&gold, &props));
        assert!(!NodeTypeFilter.node_passes(&untyped, &props));

        props.request_spec.node_type = Some("silver".to_string());
        assert!(!NodeTypeFilter.node_passes(&gold, &props));
    }
}
