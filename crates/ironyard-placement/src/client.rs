//! Placement tracking client.
//!
//! Keeps the placement service's view of every bare-metal node current:
//! one resource provider per node, its inventory, its aggregate
//! memberships, and the allocations of servers placed on it.
//!
//! Every write is either idempotent or gated on the provider generation.
//! A generation conflict evicts the cached provider, re-resolves it and
//! retries (bounded). Network and auth failures are logged and degrade to
//! "no data"; callers see `None`, `false` or an empty list and must treat
//! placement as temporarily unusable.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use http::StatusCode;
use regex::Regex;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::cache::ProviderCache;
use crate::error::{PlacementError, PlacementResult};
use crate::resource_class;
use crate::transport::{PlacementRequest, PlacementResponse, PlacementTransport};
use crate::types::*;

/// Aggregate listing and replacement.
const AGGREGATES_VERSION: &str = "1.1";
/// Resource class GET/POST.
const RESOURCE_CLASSES_VERSION: &str = "1.2";
/// `resources=` and `member_of=` provider filters.
const PROVIDER_FILTER_VERSION: &str = "1.4";
/// Idempotent `PUT /resource_classes/{name}`.
const RESOURCE_CLASS_PUT_VERSION: &str = "1.7";
/// Allocations carrying `project_id` / `user_id`.
const ALLOCATION_OWNER_VERSION: &str = "1.8";

/// Attempts made by a generation-gated inventory update.
pub const INVENTORY_UPDATE_ATTEMPTS: u32 = 3;

/// Pause between conflicting inventory update attempts.
pub const INVENTORY_RETRY_DELAY: Duration = Duration::from_secs(1);

static INVENTORY_IN_USE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("Inventory for (.+) on resource provider (.+) in use").expect("static regex")
});

/// Client for the placement service with a local provider cache.
pub struct PlacementClient {
    transport: Arc<dyn PlacementTransport>,
    cache: ProviderCache,
    retry_delay: Duration,
}

impl PlacementClient {
    /// Create a client with an empty provider cache.
    pub fn new(transport: Arc<dyn PlacementTransport>) -> Self {
        Self {
            transport,
            cache: ProviderCache::new(),
            retry_delay: INVENTORY_RETRY_DELAY,
        }
    }

    /// Override the pause between conflicting inventory attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Provider cache shared by every call on this client.
    pub fn cache(&self) -> &ProviderCache {
        &self.cache
    }

    // ── Resource providers ─────────────────────────────────────────

    /// Return the provider for `uuid`, creating it remotely if needed.
    ///
    /// A cached hit still refreshes the provider's aggregate set, since
    /// membership changes made elsewhere are not otherwise visible here.
    pub async fn ensure_provider(&self, uuid: &str, name: &str) -> Option<ResourceProvider> {
        if let Some(provider) = self.cache.get(uuid) {
            self.refresh_aggregates(uuid).await;
            return Some(provider);
        }

        let provider = match self.fetch_provider(uuid).await {
            Ok(Some(provider)) => provider,
            Ok(None) => match self.create_provider(uuid, name).await {
                Ok(provider) => provider,
                Err(e) => {
                    error!(provider = %uuid, %name, error = %e, "failed to create resource provider");
                    return None;
                }
            },
            Err(e) => {
                error!(provider = %uuid, error = %e, "failed to look up resource provider");
                return None;
            }
        };

        self.cache.insert(provider.clone());
        self.refresh_aggregates(uuid).await;
        Some(provider)
    }

    async fn fetch_provider(&self, uuid: &str) -> PlacementResult<Option<ResourceProvider>> {
        let path = format!("/resource_providers/{uuid}");
        let resp = self.send(PlacementRequest::get(&path)).await?;
        match resp.status {
            StatusCode::OK => resp.json().map(Some),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(unexpected("GET", &path, &resp)),
        }
    }

    async fn create_provider(&self, uuid: &str, name: &str) -> PlacementResult<ResourceProvider> {
        let path = "/resource_providers";
        let body = json!({ "uuid": uuid, "name": name });
        let resp = self.send(PlacementRequest::post(path, body)).await?;
        match resp.status {
            StatusCode::CREATED => {
                info!(provider = %uuid, %name, "created resource provider");
                Ok(ResourceProvider {
                    uuid: uuid.to_string(),
                    name: name.to_string(),
                    generation: 0,
                })
            }
            StatusCode::CONFLICT => {
                // Another writer created it between our GET and POST.
                debug!(provider = %uuid, "resource provider created concurrently, fetching it");
                self.fetch_provider(uuid)
                    .await?
                    .ok_or_else(|| unexpected("POST", path, &resp))
            }
            _ => Err(unexpected("POST", path, &resp)),
        }
    }

    async fn get_provider_by_name(&self, name: &str) -> PlacementResult<Option<ResourceProvider>> {
        let path = format!("/resource_providers?name={}", urlencoding::encode(name));
        let resp = self.send(PlacementRequest::get(&path)).await?;
        if resp.status != StatusCode::OK {
            return Err(unexpected("GET", &path, &resp));
        }
        let list: ProviderList = resp.json()?;
        Ok(list.resource_providers.into_iter().next())
    }

    /// Delete a provider, optionally removing its allocations first.
    ///
    /// A provider that is already gone counts as deleted.
    pub async fn delete_provider(&self, uuid: &str, cascade: bool) -> bool {
        if cascade && !self.delete_allocations_for_provider(uuid).await {
            warn!(provider = %uuid, "could not clear allocations before provider delete");
        }

        let path = format!("/resource_providers/{uuid}");
        let resp = match self.send(PlacementRequest::delete(&path)).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(provider = %uuid, error = %e, "failed to delete resource provider");
                return false;
            }
        };
        match resp.status {
            StatusCode::NO_CONTENT => {
                self.cache.remove(uuid);
                info!(provider = %uuid, "deleted resource provider");
                true
            }
            StatusCode::NOT_FOUND => {
                self.cache.remove(uuid);
                debug!(provider = %uuid, "resource provider already deleted");
                true
            }
            status => {
                error!(provider = %uuid, %status, body = %resp.text(), "failed to delete resource provider");
                false
            }
        }
    }

    /// List providers matching resource and aggregate filters.
    ///
    /// Returns an empty list when placement cannot be queried.
    pub async fn get_filtered_providers(&self, filters: &ProviderFilters) -> Vec<ResourceProvider> {
        let path = if filters.is_empty() {
            "/resource_providers".to_string()
        } else {
            format!("/resource_providers?{}", filters.to_query())
        };
        let request = PlacementRequest::get(&path).version(PROVIDER_FILTER_VERSION);
        let resp = match self.send(request).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(error = %e, "failed to list resource providers");
                return Vec::new();
            }
        };
        if resp.status != StatusCode::OK {
            error!(status = %resp.status, %path, body = %resp.text(), "failed to list resource providers");
            return Vec::new();
        }
        match resp.json::<ProviderList>() {
            Ok(list) => list.resource_providers,
            Err(e) => {
                error!(error = %e, "bad resource provider listing");
                Vec::new()
            }
        }
    }

    /// UUIDs of providers belonging to any of `aggregates`.
    pub async fn get_providers_in_aggregates(&self, aggregates: &BTreeSet<String>) -> Vec<String> {
        if aggregates.is_empty() {
            return Vec::new();
        }
        let filters = ProviderFilters {
            member_of: aggregates.clone(),
            ..ProviderFilters::default()
        };
        self.get_filtered_providers(&filters)
            .await
            .into_iter()
            .map(|p| p.uuid)
            .collect()
    }

    // ── Aggregates ─────────────────────────────────────────────────

    /// Fetch a provider's aggregate set from placement, bypassing the cache.
    pub async fn get_provider_aggregates(&self, uuid: &str) -> PlacementResult<BTreeSet<String>> {
        let path = format!("/resource_providers/{uuid}/aggregates");
        let resp = self
            .send(PlacementRequest::get(&path).version(AGGREGATES_VERSION))
            .await?;
        if resp.status != StatusCode::OK {
            return Err(unexpected("GET", &path, &resp));
        }
        let list: AggregateList = resp.json()?;
        Ok(list.aggregates.into_iter().collect())
    }

    async fn refresh_aggregates(&self, uuid: &str) {
        match self.get_provider_aggregates(uuid).await {
            Ok(aggregates) => self.cache.set_aggregates(uuid, aggregates),
            Err(e) => warn!(provider = %uuid, error = %e, "failed to refresh provider aggregates"),
        }
    }

    /// Aggregates last observed for a provider, without a remote call.
    pub fn cached_aggregates(&self, uuid: &str) -> Option<BTreeSet<String>> {
        self.cache.aggregates(uuid)
    }

    /// Add or remove the provider named `node_name` to or from an aggregate.
    pub async fn update_aggregate_membership(
        &self,
        aggregate_uuid: &str,
        node_name: &str,
        action: AggregateAction,
    ) -> PlacementResult<()> {
        let provider = self
            .get_provider_by_name(node_name)
            .await?
            .ok_or_else(|| PlacementError::NodeNotFound(node_name.to_string()))?;

        let mut aggregates = self.get_provider_aggregates(&provider.uuid).await?;
        let changed = match action {
            AggregateAction::Add => aggregates.insert(aggregate_uuid.to_string()),
            AggregateAction::Remove => aggregates.remove(aggregate_uuid),
        };
        if !changed {
            debug!(provider = %provider.uuid, aggregate = %aggregate_uuid, ?action, "aggregate membership already current");
            self.cache.set_aggregates(&provider.uuid, aggregates);
            return Ok(());
        }

        let path = format!("/resource_providers/{}/aggregates", provider.uuid);
        let body = json!(aggregates.iter().collect::<Vec<_>>());
        let resp = self
            .send(PlacementRequest::put(&path, body).version(AGGREGATES_VERSION))
            .await?;
        if resp.status != StatusCode::OK {
            return Err(unexpected("PUT", &path, &resp));
        }
        let updated: AggregateList = resp.json()?;
        self.cache
            .set_aggregates(&provider.uuid, updated.aggregates.into_iter().collect());
        info!(provider = %provider.uuid, aggregate = %aggregate_uuid, ?action, "updated aggregate membership");
        Ok(())
    }

    // ── Inventory ──────────────────────────────────────────────────

    /// Make the provider's inventory equal `inventory`.
    ///
    /// Returns `Ok(true)` once placement holds the requested inventory,
    /// `Ok(false)` when the update could not be completed (placement
    /// unreachable, conflicts exhausted, unexpected status). In-use
    /// inventory and rejected resource classes are errors.
    pub async fn set_inventory(
        &self,
        uuid: &str,
        name: &str,
        inventory: &Inventory,
    ) -> PlacementResult<bool> {
        if self.ensure_provider(uuid, name).await.is_none() {
            return Ok(false);
        }

        for rc in inventory.keys() {
            match self.ensure_resource_class(rc).await {
                Ok(()) => {}
                Err(e @ PlacementError::InvalidResourceClass { .. }) => return Err(e),
                Err(e) => {
                    error!(resource_class = %rc, error = %e, "failed to ensure resource class");
                    return Ok(false);
                }
            }
        }

        self.update_inventory(uuid, name, inventory).await
    }

    /// Current inventory and generation, or `None` if the provider is gone.
    pub async fn get_inventory(&self, uuid: &str) -> PlacementResult<Option<InventoryPayload>> {
        let path = format!("/resource_providers/{uuid}/inventories");
        let resp = self.send(PlacementRequest::get(&path)).await?;
        match resp.status {
            StatusCode::OK => resp.json().map(Some),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(unexpected("GET", &path, &resp)),
        }
    }

    async fn update_inventory(
        &self,
        uuid: &str,
        name: &str,
        inventory: &Inventory,
    ) -> PlacementResult<bool> {
        for attempt in 1..=INVENTORY_UPDATE_ATTEMPTS {
            if self.update_inventory_attempt(uuid, name, inventory).await? {
                return Ok(true);
            }
            if attempt < INVENTORY_UPDATE_ATTEMPTS {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        warn!(
            provider = %uuid,
            attempts = INVENTORY_UPDATE_ATTEMPTS,
            "giving up on inventory update"
        );
        Ok(false)
    }

    async fn update_inventory_attempt(
        &self,
        uuid: &str,
        name: &str,
        inventory: &Inventory,
    ) -> PlacementResult<bool> {
        let current = match self.get_inventory(uuid).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                warn!(provider = %uuid, "resource provider vanished during inventory update");
                self.cache.remove(uuid);
                return Ok(false);
            }
            Err(e) => {
                error!(provider = %uuid, error = %e, "failed to read inventory");
                return Ok(false);
            }
        };

        if !self.cache.contains(uuid) {
            // A previous conflict evicted it and re-resolving failed.
            return Ok(false);
        }
        let generation = current.resource_provider_generation;
        if let Some(previous) = self.cache.set_generation(uuid, generation) {
            debug!(provider = %uuid, from = previous, to = generation, "updated provider generation");
        }

        if current.inventories == *inventory {
            debug!(provider = %uuid, "inventory unchanged");
            return Ok(true);
        }

        let path = format!("/resource_providers/{uuid}/inventories");
        let payload = InventoryPayload {
            resource_provider_generation: generation,
            inventories: inventory.clone(),
        };
        let body = serde_json::to_value(&payload)
            .map_err(|e| PlacementError::Decode(format!("encode inventory: {e}")))?;
        let resp = match self.send(PlacementRequest::put(&path, body)).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(provider = %uuid, error = %e, "failed to write inventory");
                return Ok(false);
            }
        };

        match resp.status {
            StatusCode::OK => {
                let updated: InventoryPayload = resp.json()?;
                self.cache
                    .set_generation(uuid, updated.resource_provider_generation);
                info!(
                    provider = %uuid,
                    generation = updated.resource_provider_generation,
                    "updated inventory"
                );
                Ok(true)
            }
            StatusCode::CONFLICT => {
                let text = resp.text();
                if let Some(caps) = INVENTORY_IN_USE.captures(&text) {
                    return Err(PlacementError::InventoryInUse {
                        resource_classes: caps[1].to_string(),
                        provider: caps[2].to_string(),
                    });
                }
                info!(provider = %uuid, generation, "conflicting inventory update, refreshing provider");
                self.cache.evict(uuid);
                self.ensure_provider(uuid, name).await;
                Ok(false)
            }
            status => {
                error!(provider = %uuid, %status, body = %resp.text(), "failed to update inventory");
                Ok(false)
            }
        }
    }

    /// Make sure a resource class exists remotely, creating custom ones.
    async fn ensure_resource_class(&self, name: &str) -> PlacementResult<()> {
        if resource_class::is_standard(name) || self.cache.has_resource_class(name) {
            return Ok(());
        }
        if !resource_class::is_valid_custom(name) {
            return Err(PlacementError::InvalidResourceClass {
                name: name.to_string(),
                reason: "custom resource classes must match CUSTOM_[A-Z0-9_]+".to_string(),
            });
        }

        let path = format!("/resource_classes/{name}");
        let request = PlacementRequest::new(http::Method::PUT, &path).version(RESOURCE_CLASS_PUT_VERSION);
        let resp = self.send(request).await?;
        match resp.status {
            StatusCode::CREATED | StatusCode::NO_CONTENT => {
                self.cache.add_resource_class(name);
                Ok(())
            }
            StatusCode::BAD_REQUEST => Err(PlacementError::InvalidResourceClass {
                name: name.to_string(),
                reason: resp.text(),
            }),
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_ACCEPTABLE => {
                debug!(resource_class = %name, status = %resp.status, "idempotent resource class PUT unsupported, falling back");
                self.ensure_resource_class_legacy(name).await
            }
            _ => Err(unexpected("PUT", &path, &resp)),
        }
    }

    async fn ensure_resource_class_legacy(&self, name: &str) -> PlacementResult<()> {
        let path = format!("/resource_classes/{name}");
        let resp = self
            .send(PlacementRequest::get(&path).version(RESOURCE_CLASSES_VERSION))
            .await?;
        match resp.status {
            StatusCode::OK => {
                self.cache.add_resource_class(name);
                return Ok(());
            }
            StatusCode::NOT_FOUND => {}
            _ => return Err(unexpected("GET", &path, &resp)),
        }

        let resp = self
            .send(
                PlacementRequest::post("/resource_classes", json!({ "name": name }))
                    .version(RESOURCE_CLASSES_VERSION),
            )
            .await?;
        match resp.status {
            StatusCode::CREATED | StatusCode::CONFLICT => {
                info!(resource_class = %name, "ensured custom resource class");
                self.cache.add_resource_class(name);
                Ok(())
            }
            StatusCode::BAD_REQUEST => Err(PlacementError::InvalidResourceClass {
                name: name.to_string(),
                reason: resp.text(),
            }),
            _ => Err(unexpected("POST", "/resource_classes", &resp)),
        }
    }

    // ── Allocations ────────────────────────────────────────────────

    /// Record that `consumer_uuid` uses `amounts` on a single provider.
    ///
    /// Older placement services reject the owner fields; the write is then
    /// retried once without them.
    pub async fn put_allocations(
        &self,
        provider_uuid: &str,
        consumer_uuid: &str,
        amounts: &BTreeMap<String, u64>,
        project_id: &str,
        user_id: &str,
    ) -> bool {
        let path = format!("/allocations/{consumer_uuid}");
        let allocations = json!([{
            "resource_provider": { "uuid": provider_uuid },
            "resources": amounts,
        }]);
        let body = json!({
            "allocations": allocations,
            "project_id": project_id,
            "user_id": user_id,
        });

        let resp = match self
            .send(PlacementRequest::put(&path, body).version(ALLOCATION_OWNER_VERSION))
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                error!(consumer = %consumer_uuid, error = %e, "failed to put allocations");
                return false;
            }
        };

        let resp = if rejects_owner_fields(&resp) {
            debug!(consumer = %consumer_uuid, "placement rejected allocation owner, retrying without it");
            let body = json!({ "allocations": allocations });
            match self.send(PlacementRequest::put(&path, body)).await {
                Ok(resp) => resp,
                Err(e) => {
                    error!(consumer = %consumer_uuid, error = %e, "failed to put allocations");
                    return false;
                }
            }
        } else {
            resp
        };

        if resp.is_success() {
            debug!(consumer = %consumer_uuid, provider = %provider_uuid, "allocations written");
            true
        } else {
            warn!(
                consumer = %consumer_uuid,
                provider = %provider_uuid,
                status = %resp.status,
                body = %resp.text(),
                "unable to write allocations"
            );
            false
        }
    }

    /// Remove every allocation held by a consumer. Missing allocations count as removed.
    pub async fn delete_allocation_for_consumer(&self, consumer_uuid: &str) -> bool {
        let path = format!("/allocations/{consumer_uuid}");
        let resp = match self.send(PlacementRequest::delete(&path)).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(consumer = %consumer_uuid, error = %e, "failed to delete allocations");
                return false;
            }
        };
        match resp.status {
            StatusCode::NO_CONTENT => {
                info!(consumer = %consumer_uuid, "deleted allocations");
                true
            }
            StatusCode::NOT_FOUND => {
                debug!(consumer = %consumer_uuid, "no allocations to delete");
                true
            }
            status => {
                warn!(consumer = %consumer_uuid, %status, body = %resp.text(), "unable to delete allocations");
                false
            }
        }
    }

    /// Allocations against a provider, by consumer. `None` on any failure.
    pub async fn get_allocations_for_provider(&self, uuid: &str) -> Option<ProviderAllocations> {
        let path = format!("/resource_providers/{uuid}/allocations");
        let resp = match self.send(PlacementRequest::get(&path)).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(provider = %uuid, error = %e, "failed to get provider allocations");
                return None;
            }
        };
        match resp.status {
            StatusCode::OK => match resp.json() {
                Ok(allocations) => Some(allocations),
                Err(e) => {
                    error!(provider = %uuid, error = %e, "bad provider allocations");
                    None
                }
            },
            StatusCode::NOT_FOUND => Some(ProviderAllocations {
                resource_provider_generation: None,
                allocations: BTreeMap::new(),
            }),
            status => {
                error!(provider = %uuid, %status, "failed to get provider allocations");
                None
            }
        }
    }

    /// Remove the allocations of every consumer on a provider.
    pub async fn delete_allocations_for_provider(&self, uuid: &str) -> bool {
        let Some(current) = self.get_allocations_for_provider(uuid).await else {
            return false;
        };
        let mut all_deleted = true;
        for consumer in current.allocations.keys() {
            if !self.delete_allocation_for_consumer(consumer).await {
                all_deleted = false;
            }
        }
        all_deleted
    }

    async fn send(&self, request: PlacementRequest) -> PlacementResult<PlacementResponse> {
        self.transport.send(request).await
    }
}

/// Does this response say the service cannot take `project_id`/`user_id`?
fn rejects_owner_fields(resp: &PlacementResponse) -> bool {
    match resp.status {
        StatusCode::NOT_ACCEPTABLE => true,
        StatusCode::BAD_REQUEST => resp.text().contains("project_id"),
        _ => false,
    }
}

fn unexpected(method: &str, path: &str, resp: &PlacementResponse) -> PlacementError {
    if matches!(resp.status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        error!(%method, %path, status = %resp.status, "placement rejected our credentials");
    }
    PlacementError::UnexpectedStatus {
        method: method.to_string(),
        path: path.to_string(),
        status: resp.status.as_u16(),
        detail: resp.text(),
    }
}
