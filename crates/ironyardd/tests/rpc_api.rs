//! RPC surface tests: request routing, status mapping, readiness.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use ironyard_core::NodeState;
use ironyard_core::config::SchedulerSection;
use ironyard_placement::{FakePlacement, Inventory, InventoryRecord, PlacementClient};
use ironyard_scheduler::{
    MemoryCatalog, NodeCache, SchedulerCatalog, SchedulerManager, load_driver,
};
use ironyardd::build_router;
use ironyardd::rpc::{ErrorBody, SelectDestinationsResponse};
use tower::ServiceExt;

struct Fixture {
    fake: Arc<FakePlacement>,
    cache: Arc<NodeCache>,
    router: Router,
}

fn fixture() -> Fixture {
    let fake = Arc::new(FakePlacement::new());
    let cache = Arc::new(NodeCache::new());
    let catalog: Arc<dyn SchedulerCatalog> = Arc::new(MemoryCatalog::new());
    let driver = load_driver(
        &SchedulerSection::default(),
        Arc::new(PlacementClient::new(fake.clone())),
        catalog,
        cache.clone(),
    )
    .unwrap();
    let manager = Arc::new(SchedulerManager::new(driver));
    Fixture {
        fake,
        cache,
        router: build_router(manager),
    }
}

fn node(uuid: &str) -> NodeState {
    NodeState {
        uuid: uuid.to_string(),
        name: format!("node-{uuid}"),
        availability_zone: None,
        node_type: None,
        resource_class: "CUSTOM_GOLD".to_string(),
        capabilities: serde_json::Map::new(),
        ports: Vec::new(),
        available: true,
    }
}

impl Fixture {
    fn with_nodes(self, uuids: &[&str]) -> Self {
        let mut nodes = Vec::new();
        for uuid in uuids {
            let inventory: Inventory = BTreeMap::from([(
                "CUSTOM_GOLD".to_string(),
                InventoryRecord::with_total(1),
            )]);
            self.fake.add_provider(uuid, &format!("node-{uuid}"), inventory);
            nodes.push(node(uuid));
        }
        self.cache.replace(nodes);
        self
    }
}

fn select(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/rpc/v1/select_destinations")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_reflects_node_cache_readiness() {
    let fx = fixture();
    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let resp = fx.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let fx = fx.with_nodes(&[]);
    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let resp = fx.router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn select_destinations_returns_nodes_and_retry_state() {
    let fx = fixture().with_nodes(&["n1", "n2"]);

    let resp = fx
        .router
        .oneshot(select(serde_json::json!({
            "version": "1.0",
            "request_spec": {
                "server_uuids": ["s1"],
                "num_servers": 1,
                "resources": {"CUSTOM_GOLD": 1},
                "project_id": "p",
                "user_id": "u"
            },
            "filter_properties": {}
        })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: SelectDestinationsResponse = read_json(resp).await;
    assert_eq!(body.nodes, vec!["n1".to_string()]);
    let retry = body.filter_properties.retry.unwrap();
    assert_eq!(retry.num_attempts, 1);
    assert_eq!(retry.nodes, vec!["n1".to_string()]);

    assert!(fx.fake.allocations("s1").is_some());
}

#[tokio::test]
async fn no_valid_node_maps_to_conflict() {
    let fx = fixture().with_nodes(&["n1"]);

    let resp = fx
        .router
        .oneshot(select(serde_json::json!({
            "request_spec": {
                "server_uuids": ["s1"],
                "resources": {"CUSTOM_GOLD": 2}
            }
        })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let body: ErrorBody = read_json(resp).await;
    assert_eq!(body.error.kind, "NoValidNode");
    assert!(body.error.message.starts_with("No valid node was found."));
}

#[tokio::test]
async fn incompatible_version_maps_to_bad_request() {
    let fx = fixture().with_nodes(&["n1"]);

    let resp = fx
        .router
        .oneshot(select(serde_json::json!({
            "version": "2.0",
            "request_spec": {"server_uuids": ["s1"]}
        })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: ErrorBody = read_json(resp).await;
    assert_eq!(body.error.kind, "IncompatibleVersion");
}

#[tokio::test]
async fn unexpected_failure_maps_to_internal_error() {
    let fx = fixture().with_nodes(&["n1"]);

    // A group hint naming a group the catalog does not know.
    let resp = fx
        .router
        .oneshot(select(serde_json::json!({
            "request_spec": {"server_uuids": ["s1"]},
            "filter_properties": {"scheduler_hints": {"group": "missing"}}
        })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body: ErrorBody = read_json(resp).await;
    assert_eq!(body.error.kind, "Unexpected");
}
