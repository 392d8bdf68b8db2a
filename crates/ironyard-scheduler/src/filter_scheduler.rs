//! Filter scheduler — turns a request into concrete node assignments.
//!
//! One call runs these steps under the `schedule` lock:
//!
//! 1. bump the retry counter, failing once attempts are exhausted
//! 2. resolve server-group zones (affinity / anti-affinity)
//! 3. query placement for candidates, intersecting aggregate constraints
//! 4. narrow candidates to the group's zones
//! 5. filter and weigh cached node snapshots
//! 6. fail when nothing is left
//! 7. pick nodes: best N, N from one zone, or one per distinct zone
//! 8. commit allocations and record group placement
//!
//! The lock only serializes candidate computation in this process. Other
//! schedulers writing to the same placement service are kept honest by
//! placement's own generation checks on allocation writes.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use ironyard_core::config::SchedulerSection;
use ironyard_core::{
    AFFINITY_ZONE_KEY, AVAILABILITY_ZONE_KEY, FilterProperties, GroupPolicy, NodeUuid,
    RequestSpec, RetryState, ServerGroup,
};
use ironyard_placement::{PlacementClient, ProviderFilters};
use rand::Rng;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::catalog::SchedulerCatalog;
use crate::error::{SchedulerError, SchedulerResult};
use crate::node_cache::NodeCache;
use crate::node_manager::NodeManager;

/// Candidate nodes per affinity zone, in preference order.
pub type ZoneNodes = BTreeMap<String, Vec<NodeUuid>>;

/// Candidates after server-group constraints are applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidates {
    Plain(Vec<NodeUuid>),
    /// All servers must share one zone.
    Affinity(ZoneNodes),
    /// Every server needs its own zone.
    AntiAffinity(ZoneNodes),
}

impl Candidates {
    fn is_empty(&self) -> bool {
        match self {
            Candidates::Plain(nodes) => nodes.is_empty(),
            Candidates::Affinity(zones) | Candidates::AntiAffinity(zones) => {
                zones.values().all(Vec::is_empty)
            }
        }
    }

    fn all_nodes(&self) -> Vec<NodeUuid> {
        match self {
            Candidates::Plain(nodes) => nodes.clone(),
            Candidates::Affinity(zones) | Candidates::AntiAffinity(zones) => {
                let mut seen = HashSet::new();
                zones
                    .values()
                    .flatten()
                    .filter(|u| seen.insert((*u).clone()))
                    .cloned()
                    .collect()
            }
        }
    }

    /// Keep only `ranked` nodes, in `ranked` order.
    fn rank(self, ranked: &[NodeUuid]) -> Self {
        let reorder = |nodes: Vec<NodeUuid>| -> Vec<NodeUuid> {
            let members: HashSet<&str> = nodes.iter().map(String::as_str).collect();
            ranked
                .iter()
                .filter(|u| members.contains(u.as_str()))
                .cloned()
                .collect()
        };
        let reorder_zones = |zones: ZoneNodes| -> ZoneNodes {
            zones
                .into_iter()
                .map(|(zone, nodes)| (zone, reorder(nodes)))
                .filter(|(_, nodes)| !nodes.is_empty())
                .collect()
        };
        match self {
            Candidates::Plain(nodes) => Candidates::Plain(reorder(nodes)),
            Candidates::Affinity(zones) => Candidates::Affinity(reorder_zones(zones)),
            Candidates::AntiAffinity(zones) => Candidates::AntiAffinity(reorder_zones(zones)),
        }
    }
}

/// A chosen node and the affinity zone it was chosen from, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub node: NodeUuid,
    pub affinity_zone: Option<String>,
}

/// Pick `count` destinations from ranked candidates.
pub fn select_nodes<R: Rng + ?Sized>(
    candidates: &Candidates,
    count: usize,
    rng: &mut R,
) -> SchedulerResult<Vec<Selection>> {
    match candidates {
        Candidates::Plain(nodes) => {
            if nodes.len() < count {
                return Err(SchedulerError::NoValidNode(format!(
                    "Only {} of {count} requested nodes are available.",
                    nodes.len()
                )));
            }
            Ok(nodes
                .iter()
                .take(count)
                .map(|node| Selection {
                    node: node.clone(),
                    affinity_zone: None,
                })
                .collect())
        }
        Candidates::Affinity(zones) => {
            let (zone, nodes) = zones
                .iter()
                .find(|(_, nodes)| nodes.len() >= count)
                .ok_or_else(|| {
                    SchedulerError::NoValidNode(format!(
                        "No affinity zone has {count} available nodes."
                    ))
                })?;
            Ok(nodes
                .iter()
                .take(count)
                .map(|node| Selection {
                    node: node.clone(),
                    affinity_zone: Some(zone.clone()),
                })
                .collect())
        }
        Candidates::AntiAffinity(zones) => {
            let usable: Vec<(&String, &Vec<NodeUuid>)> =
                zones.iter().filter(|(_, nodes)| !nodes.is_empty()).collect();
            if usable.len() < count {
                return Err(SchedulerError::NoValidNode(format!(
                    "Only {} distinct affinity zones are available for {count} servers.",
                    usable.len()
                )));
            }
            let mut selected = Vec::with_capacity(count);
            for (zone, nodes) in usable.choose_multiple(rng, count) {
                if let Some(node) = nodes.choose(rng) {
                    selected.push(Selection {
                        node: node.clone(),
                        affinity_zone: Some((*zone).clone()),
                    });
                }
            }
            Ok(selected)
        }
    }
}

/// Placement-backed scheduler: candidates come from aggregates, ranking from
/// the node cache.
pub struct FilterScheduler {
    placement: Arc<PlacementClient>,
    catalog: Arc<dyn SchedulerCatalog>,
    node_cache: Arc<NodeCache>,
    node_manager: NodeManager,
    max_attempts: u32,
    schedule_lock: Mutex<()>,
}

impl FilterScheduler {
    /// Create a scheduler, resolving the configured filters, weighers and
    /// weight handler up front.
    pub fn new(
        config: &SchedulerSection,
        placement: Arc<PlacementClient>,
        catalog: Arc<dyn SchedulerCatalog>,
        node_cache: Arc<NodeCache>,
    ) -> SchedulerResult<Self> {
        Ok(Self {
            placement,
            catalog,
            node_cache,
            node_manager: NodeManager::new(config)?,
            max_attempts: config.max_attempts,
            schedule_lock: Mutex::new(()),
        })
    }

    /// True once the node cache has been filled at least once.
    pub fn is_ready(&self) -> bool {
        self.node_cache.is_ready()
    }

    /// Choose one node per requested server and claim it in placement.
    ///
    /// `props.request_spec` describes the request. Retry bookkeeping in
    /// `props.retry` is updated in place, so callers pass the same bag back
    /// when rescheduling.
    pub async fn schedule(&self, props: &mut FilterProperties) -> SchedulerResult<Vec<NodeUuid>> {
        let _guard = self.schedule_lock.lock().await;

        self.populate_retry(props)?;

        let spec = props.request_spec.clone();
        let count = requested_count(&spec);
        let group = self.server_group(props).await?;
        let group_zones = match &group {
            Some(group) => Some(self.group_zones(group).await?),
            None => None,
        };

        let mut candidates = self.candidate_nodes(&spec).await?;
        if let Some(retry) = &props.retry {
            candidates.retain(|u| !retry.nodes.contains(u));
        }
        debug!(request = %spec.display_id(), candidates = candidates.len(), "placement candidates");

        let candidates = match (&group, group_zones) {
            (Some(group), Some(zones)) => constrain_to_zones(group.policy, &candidates, zones),
            _ => Candidates::Plain(candidates),
        };

        let ranked = self.rank_nodes(&candidates.all_nodes(), props)?;
        let candidates = candidates.rank(&ranked);

        if candidates.is_empty() {
            return Err(SchedulerError::NoValidNode(format!(
                "There are not enough nodes available for request {}.",
                spec.display_id()
            )));
        }

        let selected = select_nodes(&candidates, count, &mut rand::thread_rng())?;

        self.commit(&spec, &selected).await;
        if let Some(group) = &group {
            self.record_group_placement(group, &spec, &selected).await;
        }

        let nodes: Vec<NodeUuid> = selected.into_iter().map(|s| s.node).collect();
        if let Some(retry) = props.retry.as_mut() {
            retry.nodes.extend(nodes.iter().cloned());
        }
        info!(request = %spec.display_id(), nodes = ?nodes, "request scheduled");
        Ok(nodes)
    }

    // ── Step 1: retries ────────────────────────────────────────────

    fn populate_retry(&self, props: &mut FilterProperties) -> SchedulerResult<()> {
        if self.max_attempts == 1 {
            // Rescheduling disabled: no bookkeeping at all.
            return Ok(());
        }
        let retry = props.retry.get_or_insert_with(RetryState::default);
        retry.num_attempts += 1;
        if retry.num_attempts > self.max_attempts {
            let last = retry.exc.as_deref().unwrap_or("none");
            return Err(SchedulerError::NoValidNode(format!(
                "Exceeded max scheduling attempts {} for server {}. Last exception: {last}",
                self.max_attempts,
                props.request_spec.display_id(),
            )));
        }
        Ok(())
    }

    // ── Step 2: server groups ──────────────────────────────────────

    async fn server_group(&self, props: &FilterProperties) -> SchedulerResult<Option<ServerGroup>> {
        let Some(uuid) = props.group_hint() else {
            return Ok(None);
        };
        match self.catalog.server_group(uuid).await? {
            Some(group) => Ok(Some(group)),
            None => Err(SchedulerError::Catalog(format!("server group {uuid} not found"))),
        }
    }

    async fn group_zones(&self, group: &ServerGroup) -> SchedulerResult<ZoneNodes> {
        match group.policy {
            GroupPolicy::Affinity => {
                // Members all share one zone; the earliest member with a
                // recorded zone decides it.
                let mut first_zone = None;
                for member in &group.members {
                    if let Some(zone) = self.catalog.server_affinity_zone(member).await? {
                        first_zone = Some(zone);
                        break;
                    }
                }
                match first_zone {
                    Some(zone) => {
                        let aggregates = self
                            .catalog
                            .aggregates_by_metadata(AFFINITY_ZONE_KEY, Some(&zone))
                            .await?;
                        let uuids = aggregates.into_iter().map(|a| a.uuid).collect();
                        let nodes = self.placement.get_providers_in_aggregates(&uuids).await;
                        Ok(ZoneNodes::from([(zone, nodes)]))
                    }
                    None => self.all_zone_nodes().await,
                }
            }
            GroupPolicy::AntiAffinity => {
                let mut member_zones = BTreeSet::new();
                for member in &group.members {
                    if let Some(zone) = self.catalog.server_affinity_zone(member).await? {
                        member_zones.insert(zone);
                    }
                }
                let mut zones = self.all_zone_nodes().await?;
                zones.retain(|zone, _| !member_zones.contains(zone));
                Ok(zones)
            }
        }
    }

    /// Nodes of every aggregate tagged with an affinity zone, per zone.
    /// Aggregates without the tag belong to no zone and are left out.
    async fn all_zone_nodes(&self) -> SchedulerResult<ZoneNodes> {
        let aggregates = self
            .catalog
            .aggregates_by_metadata(AFFINITY_ZONE_KEY, None)
            .await?;
        let mut by_zone: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for aggregate in aggregates {
            if let Some(zone) = aggregate.affinity_zone() {
                by_zone
                    .entry(zone.to_string())
                    .or_default()
                    .insert(aggregate.uuid.clone());
            }
        }

        let mut zones = ZoneNodes::new();
        for (zone, aggregate_uuids) in by_zone {
            let nodes = self.placement.get_providers_in_aggregates(&aggregate_uuids).await;
            zones.insert(zone, nodes);
        }
        Ok(zones)
    }

    // ── Step 3: candidates ─────────────────────────────────────────

    async fn candidate_nodes(&self, spec: &RequestSpec) -> SchedulerResult<Vec<NodeUuid>> {
        let mut constraints: Vec<(&str, &str)> = Vec::new();
        if let Some(zone) = spec.availability_zone.as_deref() {
            constraints.push((AVAILABILITY_ZONE_KEY, zone));
        }
        for (key, value) in &spec.resource_aggregates {
            constraints.push((key.as_str(), value.as_str()));
        }

        let mut filters = ProviderFilters {
            resources: spec.resources.clone(),
            member_of: BTreeSet::new(),
        };

        if constraints.is_empty() {
            let providers = self.placement.get_filtered_providers(&filters).await;
            return Ok(providers.into_iter().map(|p| p.uuid).collect());
        }

        let mut result: Option<Vec<NodeUuid>> = None;
        for (key, value) in constraints {
            let aggregates = self.catalog.aggregates_by_metadata(key, Some(value)).await?;
            if aggregates.is_empty() {
                debug!(%key, %value, "no aggregate matches constraint");
                return Ok(Vec::new());
            }
            filters.member_of = aggregates.into_iter().map(|a| a.uuid).collect();
            let found: HashSet<NodeUuid> = self
                .placement
                .get_filtered_providers(&filters)
                .await
                .into_iter()
                .map(|p| p.uuid)
                .collect();

            let narrowed: Vec<NodeUuid> = match result.take() {
                None => {
                    let mut nodes: Vec<NodeUuid> = found.into_iter().collect();
                    nodes.sort();
                    nodes
                }
                Some(previous) => previous.into_iter().filter(|u| found.contains(u)).collect(),
            };
            if narrowed.is_empty() {
                debug!(%key, %value, "aggregate constraint leaves no candidates");
                return Ok(Vec::new());
            }
            result = Some(narrowed);
        }
        Ok(result.unwrap_or_default())
    }

    // ── Step 5: filter and weigh ───────────────────────────────────

    fn rank_nodes(&self, uuids: &[NodeUuid], props: &FilterProperties) -> SchedulerResult<Vec<NodeUuid>> {
        let mut nodes = self.node_cache.get_many(uuids);
        if nodes.len() < uuids.len() {
            debug!(
                dropped = uuids.len() - nodes.len(),
                "candidates missing from node cache"
            );
        }
        // Candidates were scoped to the zone's aggregates; that membership
        // is the node's zone, whatever the node seed says.
        if let Some(az) = &props.request_spec.availability_zone {
            for node in &mut nodes {
                node.availability_zone = Some(az.clone());
            }
        }
        let filtered = self.node_manager.get_filtered_nodes(&nodes, props, 0)?;
        let weighed = self.node_manager.get_weighed_nodes(filtered, props)?;
        Ok(weighed.into_iter().map(|w| w.node.uuid.clone()).collect())
    }

    // ── Step 8: commit ─────────────────────────────────────────────

    async fn commit(&self, spec: &RequestSpec, selected: &[Selection]) {
        if spec.resources.is_empty() {
            debug!(request = %spec.display_id(), "no resources requested, nothing to allocate");
            return;
        }
        for (server, selection) in spec.server_uuids.iter().zip(selected) {
            let ok = self
                .placement
                .put_allocations(
                    &selection.node,
                    server,
                    &spec.resources,
                    &spec.project_id,
                    &spec.user_id,
                )
                .await;
            if !ok {
                warn!(%server, node = %selection.node, "allocation not recorded, left for reconciliation");
            }
        }
    }

    async fn record_group_placement(
        &self,
        group: &ServerGroup,
        spec: &RequestSpec,
        selected: &[Selection],
    ) {
        for (server, selection) in spec.server_uuids.iter().zip(selected) {
            let zone = selection.affinity_zone.as_deref();
            if let Err(e) = self.catalog.record_placement(&group.uuid, server, zone).await {
                warn!(group = %group.uuid, %server, error = %e, "failed to record group placement");
            }
        }
    }
}

/// Servers to place for a request; at least one.
fn requested_count(spec: &RequestSpec) -> usize {
    (spec.num_servers as usize).max(spec.server_uuids.len()).max(1)
}

/// Split `candidates` by zone, keeping candidate order within each zone.
fn constrain_to_zones(policy: GroupPolicy, candidates: &[NodeUuid], zones: ZoneNodes) -> Candidates {
    let narrowed: ZoneNodes = zones
        .into_iter()
        .map(|(zone, members)| {
            let members: HashSet<NodeUuid> = members.into_iter().collect();
            let nodes = candidates
                .iter()
                .filter(|u| members.contains(*u))
                .cloned()
                .collect();
            (zone, nodes)
        })
        .collect();
    match policy {
        GroupPolicy::Affinity => Candidates::Affinity(narrowed),
        GroupPolicy::AntiAffinity => Candidates::AntiAffinity(narrowed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn ids(names: &[&str]) -> Vec<NodeUuid> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn zones(entries: &[(&str, &[&str])]) -> ZoneNodes {
        entries
            .iter()
            .map(|(zone, nodes)| (zone.to_string(), ids(nodes)))
            .collect()
    }

    #[test]
    fn plain_selection_takes_the_best_n() {
        let mut rng = StdRng::seed_from_u64(7);
        let candidates = Candidates::Plain(ids(&["a", "b", "c"]));
        let picked = select_nodes(&candidates, 2, &mut rng).unwrap();
        let nodes: Vec<&str> = picked.iter().map(|s| s.node.as_str()).collect();
        assert_eq!(nodes, vec!["a", "b"]);

        assert!(matches!(
            select_nodes(&candidates, 4, &mut rng),
            Err(SchedulerError::NoValidNode(_))
        ));
    }

    #[test]
    fn anti_affinity_two_of_two_zones() {
        let mut rng = StdRng::seed_from_u64(1);
        let candidates = Candidates::AntiAffinity(zones(&[("z1", &["a", "b"]), ("z2", &["c"])]));

        let picked = select_nodes(&candidates, 2, &mut rng).unwrap();
        let zones_used: BTreeSet<_> = picked.iter().map(|s| s.affinity_zone.clone()).collect();
        assert_eq!(zones_used.len(), 2);
        assert!(picked.iter().any(|s| s.node == "c"));
    }

    #[test]
    fn anti_affinity_three_of_two_zones_fails() {
        let mut rng = StdRng::seed_from_u64(1);
        let candidates = Candidates::AntiAffinity(zones(&[("z1", &["a", "b"]), ("z2", &["c"])]));
        assert!(matches!(
            select_nodes(&candidates, 3, &mut rng),
            Err(SchedulerError::NoValidNode(_))
        ));
    }

    #[test]
    fn anti_affinity_ignores_empty_zones() {
        let mut rng = StdRng::seed_from_u64(3);
        let candidates = Candidates::AntiAffinity(zones(&[("z1", &["a"]), ("z2", &[])]));
        assert!(select_nodes(&candidates, 2, &mut rng).is_err());
    }

    #[test]
    fn affinity_uses_first_zone_large_enough() {
        let mut rng = StdRng::seed_from_u64(0);
        let candidates = Candidates::Affinity(zones(&[("z1", &["a"]), ("z2", &["b", "c"])]));
        let picked = select_nodes(&candidates, 2, &mut rng).unwrap();
        assert!(picked.iter().all(|s| s.affinity_zone.as_deref() == Some("z2")));
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn ranking_reorders_and_drops() {
        let candidates = Candidates::AntiAffinity(zones(&[("z1", &["a", "b"]), ("z2", &["c"])]));
        let ranked = candidates.rank(&ids(&["b", "a"]));
        assert_eq!(ranked, Candidates::AntiAffinity(zones(&[("z1", &["b", "a"])])));
    }

    #[test]
    fn zone_constraint_keeps_candidate_order() {
        let candidates = ids(&["c", "a", "b"]);
        let constrained = constrain_to_zones(
            GroupPolicy::Affinity,
            &candidates,
            zones(&[("z1", &["a", "c", "x"])]),
        );
        assert_eq!(constrained, Candidates::Affinity(zones(&[("z1", &["c", "a"])])));
    }

    #[test]
    fn requested_count_is_at_least_one() {
        let mut spec = RequestSpec::default();
        assert_eq!(requested_count(&spec), 1);
        spec.server_uuids = ids(&["s1", "s2"]);
        assert_eq!(requested_count(&spec), 2);
        spec.num_servers = 3;
        assert_eq!(requested_count(&spec), 3);
    }
}
