//! In-memory placement service for tests.
//!
//! Implements the slice of the placement REST API the client uses, with
//! real generation checks, microversion gating, capacity-aware
//! `resources=` filtering and `member_of=` aggregate filtering. Tests can
//! inject concurrent writers and outages, and inspect every request made.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

use http::{Method, StatusCode};
use serde_json::{Value, json};

use crate::error::{PlacementError, PlacementResult};
use crate::resource_class;
use crate::transport::{PlacementRequest, PlacementResponse, PlacementTransport, TransportFuture};
use crate::types::{Inventory, InventoryPayload};

#[derive(Debug, Clone)]
struct FakeProvider {
    name: String,
    generation: u64,
    inventory: Inventory,
    aggregates: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
struct FakeConsumer {
    /// Provider uuid → resource class → amount.
    allocations: BTreeMap<String, BTreeMap<String, u64>>,
    project_id: Option<String>,
    user_id: Option<String>,
}

#[derive(Debug)]
struct FakeState {
    providers: BTreeMap<String, FakeProvider>,
    resource_classes: BTreeSet<String>,
    consumers: BTreeMap<String, FakeConsumer>,
    log: Vec<(Method, String)>,
    pending_conflicts: u32,
    max_version: (u32, u32),
    unavailable: bool,
}

/// A placement service living in a mutex.
#[derive(Debug)]
pub struct FakePlacement {
    state: Mutex<FakeState>,
}

impl Default for FakePlacement {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePlacement {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                providers: BTreeMap::new(),
                resource_classes: BTreeSet::new(),
                consumers: BTreeMap::new(),
                log: Vec::new(),
                pending_conflicts: 0,
                max_version: (1, 10),
                unavailable: false,
            }),
        }
    }

    /// Pretend to be an older service.
    pub fn with_max_microversion(self, major: u32, minor: u32) -> Self {
        self.lock().max_version = (major, minor);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Seeding ────────────────────────────────────────────────────

    pub fn add_provider(&self, uuid: &str, name: &str, inventory: Inventory) {
        let mut state = self.lock();
        for rc in inventory.keys() {
            if !resource_class::is_standard(rc) {
                state.resource_classes.insert(rc.clone());
            }
        }
        state.providers.insert(
            uuid.to_string(),
            FakeProvider {
                name: name.to_string(),
                generation: 1,
                inventory,
                aggregates: BTreeSet::new(),
            },
        );
    }

    pub fn add_to_aggregate(&self, uuid: &str, aggregate: &str) {
        if let Some(provider) = self.lock().providers.get_mut(uuid) {
            provider.aggregates.insert(aggregate.to_string());
        }
    }

    /// The next `count` inventory writes race a concurrent writer and lose.
    pub fn inject_generation_conflicts(&self, count: u32) {
        self.lock().pending_conflicts = count;
    }

    /// Fail every request at the transport level.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn requests(&self) -> Vec<(Method, String)> {
        self.lock().log.clone()
    }

    /// Number of requests with `method` whose path starts with `prefix`.
    pub fn count(&self, method: &Method, prefix: &str) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|(m, p)| m == method && p.starts_with(prefix))
            .count()
    }

    /// Requests that changed (or tried to change) remote state.
    pub fn write_count(&self) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|(m, _)| *m != Method::GET)
            .count()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    pub fn generation(&self, uuid: &str) -> Option<u64> {
        self.lock().providers.get(uuid).map(|p| p.generation)
    }

    pub fn inventory(&self, uuid: &str) -> Option<Inventory> {
        self.lock().providers.get(uuid).map(|p| p.inventory.clone())
    }

    pub fn aggregates(&self, uuid: &str) -> Option<BTreeSet<String>> {
        self.lock().providers.get(uuid).map(|p| p.aggregates.clone())
    }

    pub fn has_provider(&self, uuid: &str) -> bool {
        self.lock().providers.contains_key(uuid)
    }

    pub fn has_resource_class(&self, name: &str) -> bool {
        self.lock().resource_classes.contains(name)
    }

    /// Provider uuid → resources held by `consumer`.
    pub fn allocations(&self, consumer: &str) -> Option<BTreeMap<String, BTreeMap<String, u64>>> {
        self.lock().consumers.get(consumer).map(|c| c.allocations.clone())
    }

    pub fn allocation_owner(&self, consumer: &str) -> Option<(Option<String>, Option<String>)> {
        self.lock()
            .consumers
            .get(consumer)
            .map(|c| (c.project_id.clone(), c.user_id.clone()))
    }

    // ── Request handling ───────────────────────────────────────────

    fn handle(&self, request: PlacementRequest) -> PlacementResult<PlacementResponse> {
        let mut state = self.lock();
        state.log.push((request.method.clone(), request.path.clone()));
        if state.unavailable {
            return Err(PlacementError::Transport("connection refused".to_string()));
        }

        let version = match request.microversion {
            Some(v) => match parse_version(v) {
                Some(v) => v,
                None => return Ok(error(StatusCode::BAD_REQUEST, "invalid microversion")),
            },
            None => (1, 0),
        };
        if version > state.max_version {
            return Ok(error(StatusCode::NOT_ACCEPTABLE, "unacceptable microversion"));
        }

        let (path, query) = split_query(&request.path);
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let body = request.body.unwrap_or(Value::Null);

        let resp = match (&request.method, segments.as_slice()) {
            (&Method::GET, ["resource_providers"]) => state.list_providers(&query, version),
            (&Method::POST, ["resource_providers"]) => state.create_provider(&body),
            (&Method::GET, ["resource_providers", uuid]) => state.show_provider(uuid),
            (&Method::DELETE, ["resource_providers", uuid]) => state.delete_provider(uuid),
            (&Method::GET, ["resource_providers", uuid, "aggregates"]) if version >= (1, 1) => {
                state.show_aggregates(uuid)
            }
            (&Method::PUT, ["resource_providers", uuid, "aggregates"]) if version >= (1, 1) => {
                state.replace_aggregates(uuid, &body)
            }
            (&Method::GET, ["resource_providers", uuid, "inventories"]) => {
                state.show_inventory(uuid)
            }
            (&Method::PUT, ["resource_providers", uuid, "inventories"]) => {
                state.replace_inventory(uuid, &body)
            }
            (&Method::GET, ["resource_providers", uuid, "allocations"]) => {
                state.provider_allocations(uuid)
            }
            (&Method::PUT, ["allocations", consumer]) => {
                state.put_allocations(consumer, &body, version)
            }
            (&Method::DELETE, ["allocations", consumer]) => state.delete_allocations(consumer),
            (&Method::PUT, ["resource_classes", name]) if version >= (1, 7) => {
                state.put_resource_class(name)
            }
            (&Method::GET, ["resource_classes", name]) if version >= (1, 2) => {
                state.show_resource_class(name)
            }
            (&Method::POST, ["resource_classes"]) if version >= (1, 2) => {
                state.create_resource_class(&body)
            }
            _ => error(StatusCode::NOT_FOUND, "no such route"),
        };
        Ok(resp)
    }
}

impl PlacementTransport for FakePlacement {
    fn send(&self, request: PlacementRequest) -> TransportFuture<'_> {
        let result = self.handle(request);
        Box::pin(async move { result })
    }
}

impl FakeState {
    fn usage(&self, provider: &str) -> BTreeMap<String, u64> {
        let mut usage = BTreeMap::new();
        for consumer in self.consumers.values() {
            if let Some(resources) = consumer.allocations.get(provider) {
                for (rc, amount) in resources {
                    *usage.entry(rc.clone()).or_insert(0) += amount;
                }
            }
        }
        usage
    }

    fn has_capacity(&self, uuid: &str, wanted: &BTreeMap<String, u64>, skip_consumer: Option<&str>) -> bool {
        let Some(provider) = self.providers.get(uuid) else {
            return false;
        };
        let mut usage = BTreeMap::new();
        for (consumer_id, consumer) in &self.consumers {
            if Some(consumer_id.as_str()) == skip_consumer {
                continue;
            }
            if let Some(resources) = consumer.allocations.get(uuid) {
                for (rc, amount) in resources {
                    *usage.entry(rc.as_str()).or_insert(0u64) += amount;
                }
            }
        }
        wanted.iter().all(|(rc, amount)| match provider.inventory.get(rc) {
            Some(record) => {
                let used = usage.get(rc.as_str()).copied().unwrap_or(0);
                (used + amount) as f64 <= record.capacity()
            }
            None => false,
        })
    }

    fn list_providers(&self, query: &BTreeMap<String, String>, version: (u32, u32)) -> PlacementResponse {
        let mut wanted = BTreeMap::new();
        if let Some(resources) = query.get("resources") {
            if version < (1, 4) {
                return error(StatusCode::BAD_REQUEST, "resources filter requires 1.4");
            }
            for part in resources.split(',') {
                let Some((rc, amount)) = part.split_once(':') else {
                    return error(StatusCode::BAD_REQUEST, "bad resources filter");
                };
                let Ok(amount) = amount.parse::<u64>() else {
                    return error(StatusCode::BAD_REQUEST, "bad resources amount");
                };
                wanted.insert(rc.to_string(), amount);
            }
        }
        let mut member_of = BTreeSet::new();
        if let Some(filter) = query.get("member_of") {
            if version < (1, 3) {
                return error(StatusCode::BAD_REQUEST, "member_of filter requires 1.3");
            }
            let list = filter.strip_prefix("in:").unwrap_or(filter);
            member_of.extend(list.split(',').map(str::to_string));
        }

        let providers: Vec<Value> = self
            .providers
            .iter()
            .filter(|(_, p)| query.get("name").is_none_or(|n| *n == p.name))
            .filter(|(_, p)| member_of.is_empty() || !p.aggregates.is_disjoint(&member_of))
            .filter(|(uuid, _)| wanted.is_empty() || self.has_capacity(uuid, &wanted, None))
            .map(|(uuid, p)| json!({"uuid": uuid, "name": p.name, "generation": p.generation}))
            .collect();
        ok(json!({ "resource_providers": providers }))
    }

    fn create_provider(&mut self, body: &Value) -> PlacementResponse {
        let (Some(uuid), Some(name)) = (body["uuid"].as_str(), body["name"].as_str()) else {
            return error(StatusCode::BAD_REQUEST, "uuid and name required");
        };
        if self.providers.contains_key(uuid) || self.providers.values().any(|p| p.name == name) {
            return error(StatusCode::CONFLICT, "Conflicting resource provider already exists");
        }
        self.providers.insert(
            uuid.to_string(),
            FakeProvider {
                name: name.to_string(),
                generation: 0,
                inventory: Inventory::new(),
                aggregates: BTreeSet::new(),
            },
        );
        PlacementResponse::new(StatusCode::CREATED, "")
    }

    fn show_provider(&self, uuid: &str) -> PlacementResponse {
        match self.providers.get(uuid) {
            Some(p) => ok(json!({"uuid": uuid, "name": p.name, "generation": p.generation})),
            None => error(StatusCode::NOT_FOUND, "no such resource provider"),
        }
    }

    fn delete_provider(&mut self, uuid: &str) -> PlacementResponse {
        if !self.providers.contains_key(uuid) {
            return error(StatusCode::NOT_FOUND, "no such resource provider");
        }
        if !self.usage(uuid).is_empty() {
            return error(StatusCode::CONFLICT, "resource provider has allocations");
        }
        self.providers.remove(uuid);
        PlacementResponse::new(StatusCode::NO_CONTENT, "")
    }

    fn show_aggregates(&self, uuid: &str) -> PlacementResponse {
        match self.providers.get(uuid) {
            Some(p) => ok(json!({ "aggregates": p.aggregates })),
            None => error(StatusCode::NOT_FOUND, "no such resource provider"),
        }
    }

    fn replace_aggregates(&mut self, uuid: &str, body: &Value) -> PlacementResponse {
        let Some(list) = body.as_array() else {
            return error(StatusCode::BAD_REQUEST, "expected a list of aggregates");
        };
        let aggregates: BTreeSet<String> =
            list.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
        match self.providers.get_mut(uuid) {
            Some(p) => {
                p.aggregates = aggregates;
                ok(json!({ "aggregates": p.aggregates }))
            }
            None => error(StatusCode::NOT_FOUND, "no such resource provider"),
        }
    }

    fn show_inventory(&self, uuid: &str) -> PlacementResponse {
        match self.providers.get(uuid) {
            Some(p) => ok(json!({
                "resource_provider_generation": p.generation,
                "inventories": p.inventory,
            })),
            None => error(StatusCode::NOT_FOUND, "no such resource provider"),
        }
    }

    fn replace_inventory(&mut self, uuid: &str, body: &Value) -> PlacementResponse {
        let payload: InventoryPayload = match serde_json::from_value(body.clone()) {
            Ok(p) => p,
            Err(e) => return error(StatusCode::BAD_REQUEST, &e.to_string()),
        };
        if !self.providers.contains_key(uuid) {
            return error(StatusCode::NOT_FOUND, "no such resource provider");
        }
        if self.pending_conflicts > 0 {
            self.pending_conflicts -= 1;
            if let Some(p) = self.providers.get_mut(uuid) {
                p.generation += 1;
            }
        }
        let usage = self.usage(uuid);
        let Some(provider) = self.providers.get_mut(uuid) else {
            return error(StatusCode::NOT_FOUND, "no such resource provider");
        };
        if payload.resource_provider_generation != provider.generation {
            return error(
                StatusCode::CONFLICT,
                "resource provider generation conflict",
            );
        }
        let in_use: Vec<String> = usage
            .iter()
            .filter(|(rc, used)| {
                payload
                    .inventories
                    .get(*rc)
                    .is_none_or(|record| (**used as f64) > record.capacity())
            })
            .map(|(rc, _)| format!("'{rc}'"))
            .collect();
        if !in_use.is_empty() {
            let detail = format!(
                "Inventory for {} on resource provider '{uuid}' in use.",
                in_use.join(", ")
            );
            return error(StatusCode::CONFLICT, &detail);
        }
        provider.inventory = payload.inventories;
        provider.generation += 1;
        ok(json!({
            "resource_provider_generation": provider.generation,
            "inventories": provider.inventory,
        }))
    }

    fn provider_allocations(&self, uuid: &str) -> PlacementResponse {
        let Some(provider) = self.providers.get(uuid) else {
            return error(StatusCode::NOT_FOUND, "no such resource provider");
        };
        let mut allocations = serde_json::Map::new();
        for (consumer_id, consumer) in &self.consumers {
            if let Some(resources) = consumer.allocations.get(uuid) {
                allocations.insert(consumer_id.clone(), json!({ "resources": resources }));
            }
        }
        ok(json!({
            "resource_provider_generation": provider.generation,
            "allocations": allocations,
        }))
    }

    fn put_allocations(&mut self, consumer: &str, body: &Value, version: (u32, u32)) -> PlacementResponse {
        let has_owner = body.get("project_id").is_some() || body.get("user_id").is_some();
        if version < (1, 8) && has_owner {
            return error(
                StatusCode::BAD_REQUEST,
                "Additional properties are not allowed ('project_id', 'user_id' were unexpected)",
            );
        }
        if version >= (1, 8) && !has_owner {
            return error(StatusCode::BAD_REQUEST, "'project_id' is a required property");
        }
        let Some(list) = body["allocations"].as_array() else {
            return error(StatusCode::BAD_REQUEST, "allocations required");
        };

        let mut allocations = BTreeMap::new();
        for entry in list {
            let Some(uuid) = entry["resource_provider"]["uuid"].as_str() else {
                return error(StatusCode::BAD_REQUEST, "resource_provider.uuid required");
            };
            let resources: BTreeMap<String, u64> =
                match serde_json::from_value(entry["resources"].clone()) {
                    Ok(r) => r,
                    Err(e) => return error(StatusCode::BAD_REQUEST, &e.to_string()),
                };
            if !self.providers.contains_key(uuid) {
                return error(StatusCode::BAD_REQUEST, "unknown resource provider");
            }
            if !self.has_capacity(uuid, &resources, Some(consumer)) {
                return error(StatusCode::CONFLICT, "Unable to allocate inventory: capacity exceeded");
            }
            allocations.insert(uuid.to_string(), resources);
        }

        for uuid in allocations.keys() {
            if let Some(p) = self.providers.get_mut(uuid) {
                p.generation += 1;
            }
        }
        self.consumers.insert(
            consumer.to_string(),
            FakeConsumer {
                allocations,
                project_id: body["project_id"].as_str().map(str::to_string),
                user_id: body["user_id"].as_str().map(str::to_string),
            },
        );
        PlacementResponse::new(StatusCode::NO_CONTENT, "")
    }

    fn delete_allocations(&mut self, consumer: &str) -> PlacementResponse {
        match self.consumers.remove(consumer) {
            Some(removed) => {
                for uuid in removed.allocations.keys() {
                    if let Some(p) = self.providers.get_mut(uuid) {
                        p.generation += 1;
                    }
                }
                PlacementResponse::new(StatusCode::NO_CONTENT, "")
            }
            None => error(StatusCode::NOT_FOUND, "no allocations for consumer"),
        }
    }

    fn put_resource_class(&mut self, name: &str) -> PlacementResponse {
        if !resource_class::is_valid_custom(name) {
            return error(StatusCode::BAD_REQUEST, "invalid custom resource class name");
        }
        if self.resource_classes.insert(name.to_string()) {
            PlacementResponse::new(StatusCode::CREATED, "")
        } else {
            PlacementResponse::new(StatusCode::NO_CONTENT, "")
        }
    }

    fn show_resource_class(&self, name: &str) -> PlacementResponse {
        if resource_class::is_standard(name) || self.resource_classes.contains(name) {
            ok(json!({ "name": name }))
        } else {
            error(StatusCode::NOT_FOUND, "no such resource class")
        }
    }

    fn create_resource_class(&mut self, body: &Value) -> PlacementResponse {
        let Some(name) = body["name"].as_str() else {
            return error(StatusCode::BAD_REQUEST, "name required");
        };
        if !resource_class::is_valid_custom(name) {
            return error(StatusCode::BAD_REQUEST, "invalid custom resource class name");
        }
        if self.resource_classes.insert(name.to_string()) {
            PlacementResponse::new(StatusCode::CREATED, "")
        } else {
            error(StatusCode::CONFLICT, "resource class already exists")
        }
    }
}

fn ok(body: Value) -> PlacementResponse {
    PlacementResponse::new(StatusCode::OK, body.to_string())
}

fn error(status: StatusCode, detail: &str) -> PlacementResponse {
    let body = json!({
        "errors": [{ "status": status.as_u16(), "title": status.canonical_reason(), "detail": detail }]
    });
    PlacementResponse::new(status, body.to_string())
}

fn parse_version(raw: &str) -> Option<(u32, u32)> {
    let (major, minor) = raw.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

fn split_query(raw: &str) -> (&str, BTreeMap<String, String>) {
    let Some((path, query)) = raw.split_once('?') else {
        return (raw, BTreeMap::new());
    };
    let params = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| {
            let value = urlencoding::decode(v).map(|d| d.into_owned()).unwrap_or_else(|_| v.to_string());
            (k.to_string(), value)
        })
        .collect();
    (path, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InventoryRecord;

    fn inventory(rc: &str, total: u64) -> Inventory {
        Inventory::from([(rc.to_string(), InventoryRecord::with_total(total))])
    }

    #[tokio::test]
    async fn resources_filter_respects_usage() {
        let fake = FakePlacement::new();
        fake.add_provider("p1", "node-1", inventory("VCPU", 1));
        fake.add_provider("p2", "node-2", inventory("VCPU", 2));

        let alloc = PlacementRequest::put(
            "/allocations/s1",
            json!({
                "allocations": [{"resource_provider": {"uuid": "p1"}, "resources": {"VCPU": 1}}],
                "project_id": "proj",
                "user_id": "user",
            }),
        )
        .version("1.8");
        let resp = fake.send(alloc).await.unwrap();
        assert_eq!(resp.status, StatusCode::NO_CONTENT);

        let list = fake
            .send(PlacementRequest::get("/resource_providers?resources=VCPU%3A1").version("1.4"))
            .await
            .unwrap();
        let body: Value = list.json().unwrap();
        let uuids: Vec<&str> = body["resource_providers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["uuid"].as_str().unwrap())
            .collect();
        assert_eq!(uuids, vec!["p2"]);
    }

    #[tokio::test]
    async fn rejects_versions_above_maximum() {
        let fake = FakePlacement::new().with_max_microversion(1, 6);
        let resp = fake
            .send(PlacementRequest::new(Method::PUT, "/resource_classes/CUSTOM_X").version("1.7"))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn outage_is_a_transport_error() {
        let fake = FakePlacement::new();
        fake.set_unavailable(true);
        let err = fake
            .send(PlacementRequest::get("/resource_providers"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlacementError::Transport(_)));
        assert_eq!(fake.requests().len(), 1);
    }

    #[test]
    fn split_query_decodes_values() {
        let (path, query) = split_query("/resource_providers?member_of=in%3Aa%2Cb&name=x");
        assert_eq!(path, "/resource_providers");
        assert_eq!(query.get("member_of").map(String::as_str), Some("in:a,b"));
        assert_eq!(query.get("name").map(String::as_str), Some("x"));
    }
}
