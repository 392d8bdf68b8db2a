use ironyard_core::{FilterProperties, NodeState};
use serde_json::Value;
use tracing::debug;

use super::Filter;
use super::extra_specs_ops;

const CAPABILITIES_SCOPE: &str = "capabilities";

/// Matches `capabilities:`-scoped extra specs against node capabilities.
///
/// `capabilities:cpu:arch = x86_64` looks up `cpu` → `arch` in the node's
/// capability tree. Keys without a scope, or with another scope, are left to
/// other filters.
pub struct CapabilitiesFilter;

impl CapabilitiesFilter {
    fn satisfies(node: &NodeState, path: &[&str], req: &str) -> bool {
        let Some(cap) = node.capability(path) else {
            return false;
        };
        match cap {
            Value::Array(items) => items.iter().any(|item| value_matches(item, req)),
            other => value_matches(other, req),
        }
    }
}

fn value_matches(value: &Value, req: &str) -> bool {
    match value {
        Value::String(s) => extra_specs_ops::matches(s, req),
        Value::Number(n) => extra_specs_ops::matches(&n.to_string(), req),
        Value::Bool(b) => extra_specs_ops::matches(&b.to_string(), req),
        _ => false,
    }
}

impl Filter for CapabilitiesFilter {
    fn name(&self) -> &'static str {
        "CapabilitiesFilter"
    }

    fn node_passes(&self, node: &NodeState, props: &FilterProperties) -> bool {
        for (key, req) in &props.request_spec.extra_specs {
            let scope: Vec<&str> = key.split(':').collect();
            let path = match scope.as_slice() {
                [CAPABILITIES_SCOPE, path @ ..] if !path.is_empty() => path,
                _ => continue,
            };
            if !Self::satisfies(node, path, req) {
                debug!(node = %node.uuid, capability = %key, requirement = %req, "capability not satisfied");
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::node;
    use serde_json::json;

    fn with_caps(caps: Value) -> NodeState {
        let mut n = node("a");
        n.capabilities = caps.as_object().cloned().unwrap_or_default();
        n
    }

    fn props(specs: &[(&str, &str)]) -> FilterProperties {
        let mut props = FilterProperties::default();
        for (k, v) in specs {
            props
                .request_spec
                .extra_specs
                .insert(k.to_string(), v.to_string());
        }
        props
    }

    #[test]
    fn missing_capability_path_fails() {
        let n = with_caps(json!({"cpu": {"arch": "x86_64"}}));
        assert!(!CapabilitiesFilter.node_passes(&n, &props(&[("capabilities:cpu:vendor", "intel")])));
        assert!(!CapabilitiesFilter.node_passes(&n, &props(&[("capabilities:gpu", "true")])));
    }

    #[test]
    fn nested_path_matches() {
        let n = with_caps(json!({"cpu": {"arch": "x86_64"}}));
        assert!(CapabilitiesFilter.node_passes(&n, &props(&[("capabilities:cpu:arch", "x86_64")])));
        assert!(!CapabilitiesFilter.node_passes(&n, &props(&[("capabilities:cpu:arch", "aarch64")])));
    }

    #[test]
    fn list_capability_matches_any_element() {
        let n = with_caps(json!({"boot_modes": ["bios", "uefi"]}));
        assert!(CapabilitiesFilter.node_passes(&n, &props(&[("capabilities:boot_modes", "uefi")])));
        assert!(!CapabilitiesFilter.node_passes(&n, &props(&[("capabilities:boot_modes", "pxe")])));
    }

    #[test]
    fn unscoped_and_foreign_keys_are_ignored() {
        let n = with_caps(json!({}));
        let p = props(&[("hw:cpu_policy", "dedicated"), ("memory", "big"), ("capabilities", "x")]);
        assert!(CapabilitiesFilter.node_passes(&n, &p));
    }

    #[test]
    fn operators_apply_to_numbers_and_bools() {
        let n = with_caps(json!({"cpus": 32, "sriov": true}));
        assert!(CapabilitiesFilter.node_passes(&n, &props(&[("capabilities:cpus", ">= 16")])));
        assert!(!CapabilitiesFilter.node_passes(&n, &props(&[("capabilities:cpus", ">= 64")])));
        assert!(CapabilitiesFilter.node_passes(&n, &props(&[("capabilities:sriov", "true")])));
    }

    #[test]
    fn every_scoped_key_must_match() {
        let n = with_caps(json!({"arch": "x86_64", "raid": "1"}));
        let p = props(&[("capabilities:arch", "x86_64"), ("capabilities:raid", "<or> 5 <or> 10")]);
        assert!(!CapabilitiesFilter.node_passes(&n, &p));
    }
}
