//! Shared types used across ironyard crates.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Identifier of a bare-metal node. Equal to its resource provider UUID.
pub type NodeUuid = String;

/// Identifier of a server (the consumer of an allocation).
pub type ServerUuid = String;

/// Identifier of a host aggregate.
pub type AggregateUuid = String;

/// Aggregate metadata key naming the availability zone of its members.
pub const AVAILABILITY_ZONE_KEY: &str = "availability_zone";

/// Aggregate metadata key naming the affinity zone of its members.
pub const AFFINITY_ZONE_KEY: &str = "affinity_zone";

/// Scheduler hint carrying the server group UUID.
pub const GROUP_HINT: &str = "group";

// ── Nodes ─────────────────────────────────────────────────────────

/// A physical port on a bare-metal node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub address: String,
    /// Port type tag (e.g. "10GE"), matched against requested networks.
    #[serde(default)]
    pub port_type: Option<String>,
}

/// Point-in-time snapshot of one node's scheduling-relevant attributes.
///
/// Built from the node cache, never from the placement service. Filters and
/// weighers only ever see a shared reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub uuid: NodeUuid,
    pub name: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    /// Declared node type, matched against the requested flavor/type.
    #[serde(default)]
    pub node_type: Option<String>,
    /// Resource class this node reports to placement (one unit per node).
    pub resource_class: String,
    /// Nested capability tree, addressed by colon-separated paths.
    #[serde(default)]
    pub capabilities: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub ports: Vec<PortInfo>,
    /// False when the node is in maintenance or otherwise unusable.
    #[serde(default = "default_true")]
    pub available: bool,
}

fn default_true() -> bool {
    true
}

impl NodeState {
    /// Look up a capability by its path segments (`["cpu", "arch"]`).
    pub fn capability(&self, path: &[&str]) -> Option<&serde_json::Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.capabilities.get(*first)?;
        for segment in rest {
            current = current.as_object()?.get(*segment)?;
        }
        Some(current)
    }
}

// ── Groups and aggregates ─────────────────────────────────────────

/// Placement policy of a server group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupPolicy {
    #[serde(rename = "affinity")]
    Affinity,
    #[serde(rename = "anti-affinity")]
    AntiAffinity,
}

impl std::fmt::Display for GroupPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupPolicy::Affinity => f.write_str("affinity"),
            GroupPolicy::AntiAffinity => f.write_str("anti-affinity"),
        }
    }
}

/// A named placement policy plus its already-placed members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerGroup {
    pub uuid: String,
    pub name: String,
    pub policy: GroupPolicy,
    /// Member server UUIDs in insertion order.
    #[serde(default)]
    pub members: Vec<ServerUuid>,
}

/// A grouping of nodes carrying free-form metadata (zones, affinity tags).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub uuid: AggregateUuid,
    pub name: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Aggregate {
    pub fn affinity_zone(&self) -> Option<&str> {
        self.metadata.get(AFFINITY_ZONE_KEY).map(String::as_str)
    }
}

// ── Requests ──────────────────────────────────────────────────────

/// A network the server must be attached to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestedNetwork {
    #[serde(default)]
    pub uuid: Option<String>,
    /// Port type the attachment requires, if any.
    #[serde(default)]
    pub port_type: Option<String>,
}

/// What the caller wants placed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSpec {
    /// Servers being placed, one per requested node.
    pub server_uuids: Vec<ServerUuid>,
    pub num_servers: u32,
    pub availability_zone: Option<String>,
    /// Requested node type (flavor name).
    pub node_type: Option<String>,
    /// Resource class → amount consumed per server.
    pub resources: BTreeMap<String, u64>,
    /// Aggregate metadata key → value constraints; each must be satisfied.
    pub resource_aggregates: BTreeMap<String, String>,
    /// Flavor extra specs, including `capabilities:`-scoped keys.
    pub extra_specs: BTreeMap<String, String>,
    pub requested_networks: Vec<RequestedNetwork>,
    pub project_id: String,
    pub user_id: String,
}

impl RequestSpec {
    /// Human-readable identifier for logs and errors.
    pub fn display_id(&self) -> String {
        if self.server_uuids.is_empty() {
            "<unnamed request>".to_string()
        } else {
            self.server_uuids.join(",")
        }
    }
}

/// Rescheduling history carried between attempts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryState {
    pub num_attempts: u32,
    /// Nodes already tried for this request.
    pub nodes: Vec<NodeUuid>,
    /// Last failure reported by the caller.
    pub exc: Option<String>,
}

/// Request-scoped bag consulted by filters and mutated across attempts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterProperties {
    pub retry: Option<RetryState>,
    pub scheduler_hints: BTreeMap<String, String>,
    /// Overrides the configured filter list for this request.
    pub filter_names: Option<Vec<String>>,
    /// Overrides the configured weigher list for this request.
    pub weigher_names: Option<Vec<String>>,
    /// Filled in by the scheduler from the incoming request.
    pub request_spec: RequestSpec,
}

impl FilterProperties {
    pub fn group_hint(&self) -> Option<&str> {
        self.scheduler_hints.get(GROUP_HINT).map(String::as_str)
    }
}

/// Weighers read the same bag filters do.
pub type WeightProperties = FilterProperties;
