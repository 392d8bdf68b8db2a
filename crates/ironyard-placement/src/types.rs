//! Wire types exchanged with the placement service.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// One physical node as tracked by placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProvider {
    pub uuid: String,
    pub name: String,
    /// Optimistic-concurrency counter; bumped by every successful write.
    pub generation: u64,
}

/// Capacity of one resource class on one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub total: u64,
    #[serde(default)]
    pub reserved: u64,
    #[serde(default = "one")]
    pub min_unit: u64,
    #[serde(default = "max_unit_default")]
    pub max_unit: u64,
    #[serde(default = "one")]
    pub step_size: u64,
    #[serde(default = "ratio_default")]
    pub allocation_ratio: f64,
}

fn one() -> u64 {
    1
}

fn max_unit_default() -> u64 {
    i32::MAX as u64
}

fn ratio_default() -> f64 {
    1.0
}

impl InventoryRecord {
    /// A record for `total` units with placement's defaults for the rest.
    pub fn with_total(total: u64) -> Self {
        Self {
            total,
            reserved: 0,
            min_unit: 1,
            max_unit: total.max(1),
            step_size: 1,
            allocation_ratio: 1.0,
        }
    }

    /// Units that may still be consumed.
    pub fn capacity(&self) -> f64 {
        (self.total.saturating_sub(self.reserved)) as f64 * self.allocation_ratio
    }
}

/// Resource class name → capacity record.
pub type Inventory = BTreeMap<String, InventoryRecord>;

/// Body of `GET/PUT /resource_providers/{uuid}/inventories`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryPayload {
    pub resource_provider_generation: u64,
    #[serde(default)]
    pub inventories: Inventory,
}

/// Query filters for `GET /resource_providers`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderFilters {
    /// Resource class → amount that must be free.
    pub resources: BTreeMap<String, u64>,
    /// Provider must be a member of at least one of these aggregates.
    pub member_of: BTreeSet<String>,
}

impl ProviderFilters {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.member_of.is_empty()
    }

    /// Encode as a query string (without the leading `?`).
    pub fn to_query(&self) -> String {
        let mut parts = Vec::new();
        if !self.resources.is_empty() {
            let resources = self
                .resources
                .iter()
                .map(|(rc, amount)| format!("{rc}:{amount}"))
                .collect::<Vec<_>>()
                .join(",");
            parts.push(format!("resources={}", urlencoding::encode(&resources)));
        }
        if !self.member_of.is_empty() {
            let aggs = self.member_of.iter().cloned().collect::<Vec<_>>().join(",");
            parts.push(format!(
                "member_of={}",
                urlencoding::encode(&format!("in:{aggs}"))
            ));
        }
        parts.join("&")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProviderList {
    pub resource_providers: Vec<ResourceProvider>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AggregateList {
    pub aggregates: Vec<String>,
}

/// Resources held by one consumer on one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerResources {
    pub resources: BTreeMap<String, u64>,
}

/// Body of `GET /resource_providers/{uuid}/allocations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAllocations {
    #[serde(default)]
    pub resource_provider_generation: Option<u64>,
    #[serde(default)]
    pub allocations: BTreeMap<String, ConsumerResources>,
}

/// Whether an aggregate membership update adds or removes the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateAction {
    Add,
    Remove,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filters_encode_to_nothing() {
        let filters = ProviderFilters::default();
        assert!(filters.is_empty());
        assert_eq!(filters.to_query(), "");
    }

    #[test]
    fn filters_encode_resources_and_member_of() {
        let mut filters = ProviderFilters::default();
        filters.resources.insert("VCPU".to_string(), 1);
        filters.resources.insert("MEMORY_MB".to_string(), 512);
        filters.member_of.insert("agg-b".to_string());
        filters.member_of.insert("agg-a".to_string());

        let query = filters.to_query();
        assert_eq!(
            query,
            "resources=MEMORY_MB%3A512%2CVCPU%3A1&member_of=in%3Aagg-a%2Cagg-b"
        );
    }

    #[test]
    fn inventory_record_defaults_when_sparse() {
        let record: InventoryRecord = serde_json::from_str(r#"{"total": 4}"#).unwrap();
        assert_eq!(record.reserved, 0);
        assert_eq!(record.min_unit, 1);
        assert_eq!(record.step_size, 1);
        assert_eq!(record.allocation_ratio, 1.0);
        assert_eq!(record.capacity(), 4.0);
    }

    #[test]
    fn capacity_respects_reserved_and_ratio() {
        let mut record = InventoryRecord::with_total(10);
        record.reserved = 2;
        record.allocation_ratio = 1.5;
        assert_eq!(record.capacity(), 12.0);
    }
}
