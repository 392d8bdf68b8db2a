//! Mirrors the node list into placement.
//!
//! Every bare-metal node is one unit of its resource class. A node that is
//! not available keeps its provider but reserves that unit, so it drops out
//! of `resources=` queries without losing its aggregate memberships.
//! Providers of nodes that disappeared are deleted along with their
//! allocations.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use ironyard_core::NodeState;
use ironyard_placement::resource_class::normalize_name;
use ironyard_placement::{Inventory, InventoryRecord, PlacementClient, PlacementError};
use tracing::{error, info, warn};

/// Outcome of one reporting pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub updated: usize,
    pub failed: usize,
    pub removed: usize,
}

pub struct InventoryReporter {
    placement: Arc<PlacementClient>,
    /// Nodes reported by the previous pass.
    known: Mutex<BTreeSet<String>>,
}

/// Inventory for a single bare-metal node.
pub fn node_inventory(node: &NodeState) -> Inventory {
    let record = InventoryRecord {
        total: 1,
        reserved: if node.available { 0 } else { 1 },
        min_unit: 1,
        max_unit: 1,
        step_size: 1,
        allocation_ratio: 1.0,
    };
    Inventory::from([(normalize_name(&node.resource_class), record)])
}

impl InventoryReporter {
    pub fn new(placement: Arc<PlacementClient>) -> Self {
        Self {
            placement,
            known: Mutex::new(BTreeSet::new()),
        }
    }

    pub async fn report(&self, nodes: &[NodeState]) -> ReportSummary {
        let mut summary = ReportSummary::default();

        for node in nodes {
            let inventory = node_inventory(node);
            match self.placement.set_inventory(&node.uuid, &node.name, &inventory).await {
                Ok(true) => summary.updated += 1,
                Ok(false) => {
                    warn!(node = %node.uuid, "inventory not updated, will retry next refresh");
                    summary.failed += 1;
                }
                Err(e @ PlacementError::InventoryInUse { .. }) => {
                    // Typically a node leaving service while a server still runs on it.
                    warn!(node = %node.uuid, error = %e, "inventory change blocked by allocations");
                    summary.failed += 1;
                }
                Err(e) => {
                    error!(node = %node.uuid, error = %e, "failed to report inventory");
                    summary.failed += 1;
                }
            }
        }

        let current: BTreeSet<String> = nodes.iter().map(|n| n.uuid.clone()).collect();
        let previous = {
            let mut known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *known, current.clone())
        };

        let mut failed_removals = BTreeSet::new();
        for gone in previous.difference(&current) {
            if self.placement.delete_provider(gone, true).await {
                info!(node = %gone, "removed resource provider of vanished node");
                summary.removed += 1;
            } else {
                failed_removals.insert(gone.clone());
            }
        }
        if !failed_removals.is_empty() {
            // Try again next pass.
            let mut known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
            known.extend(failed_removals);
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::node;
    use ironyard_placement::FakePlacement;

    fn setup() -> (Arc<FakePlacement>, InventoryReporter) {
        let fake = Arc::new(FakePlacement::new());
        let client = Arc::new(PlacementClient::new(fake.clone()));
        (fake, InventoryReporter::new(client))
    }

    #[test]
    fn unavailable_nodes_reserve_their_unit() {
        let mut n = node("a");
        n.resource_class = "baremetal gold".to_string();
        n.available = false;
        let inventory = node_inventory(&n);
        let record = &inventory["CUSTOM_BAREMETAL_GOLD"];
        assert_eq!(record.total, 1);
        assert_eq!(record.reserved, 1);
        assert_eq!(record.capacity(), 0.0);
    }

    #[tokio::test]
    async fn reports_nodes_and_removes_vanished_ones() {
        let (fake, reporter) = setup();

        let summary = reporter.report(&[node("a"), node("b")]).await;
        assert_eq!(summary.updated, 2);
        assert!(fake.has_provider("a"));
        assert_eq!(
            fake.inventory("b").unwrap()["CUSTOM_GOLD"].total,
            1
        );

        let summary = reporter.report(&[node("b")]).await;
        assert_eq!(summary.removed, 1);
        assert!(!fake.has_provider("a"));
        assert!(fake.has_provider("b"));
    }

    #[tokio::test]
    async fn failed_removal_is_retried_next_pass() {
        let (fake, reporter) = setup();
        reporter.report(&[node("a")]).await;

        fake.set_unavailable(true);
        let summary = reporter.report(&[]).await;
        assert_eq!(summary.removed, 0);

        fake.set_unavailable(false);
        let summary = reporter.report(&[]).await;
        assert_eq!(summary.removed, 1);
        assert!(!fake.has_provider("a"));
    }
}
