//! HTTP front for the scheduler RPC facade.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/rpc/v1/select_destinations` | Pick one node per server |
//! | GET | `/healthz` | 200 once the node cache is loaded, 503 before |

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use ironyard_core::{FilterProperties, NodeUuid, RequestSpec};
use ironyard_scheduler::{RpcError, SchedulerManager};
use serde::{Deserialize, Serialize};

/// Shared state for RPC handlers.
#[derive(Clone)]
pub struct RpcState {
    pub manager: Arc<SchedulerManager>,
}

#[derive(Debug, Deserialize)]
pub struct SelectDestinationsRequest {
    /// Caller's RPC API version; the served version when absent.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub request_spec: RequestSpec,
    #[serde(default)]
    pub filter_properties: FilterProperties,
}

/// The chosen nodes plus the updated properties bag, which callers send
/// back unchanged when they reschedule.
#[derive(Debug, Serialize, Deserialize)]
pub struct SelectDestinationsResponse {
    pub nodes: Vec<NodeUuid>,
    pub filter_properties: FilterProperties,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

fn error_response(e: &RpcError) -> impl IntoResponse {
    let (status, kind) = match e {
        RpcError::NoValidNode(_) => (StatusCode::CONFLICT, "NoValidNode"),
        RpcError::IncompatibleVersion { .. } => (StatusCode::BAD_REQUEST, "IncompatibleVersion"),
        RpcError::Unexpected(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Unexpected"),
    };
    (
        status,
        Json(ErrorBody {
            error: ErrorDetail {
                kind: kind.to_string(),
                message: e.to_string(),
            },
        }),
    )
}

/// POST /rpc/v1/select_destinations
pub async fn select_destinations(
    State(state): State<RpcState>,
    Json(req): Json<SelectDestinationsRequest>,
) -> impl IntoResponse {
    let mut filter_properties = req.filter_properties;
    match state
        .manager
        .select_destinations(req.version.as_deref(), req.request_spec, &mut filter_properties)
        .await
    {
        Ok(nodes) => Json(SelectDestinationsResponse {
            nodes,
            filter_properties,
        })
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// GET /healthz
pub async fn healthz(State(state): State<RpcState>) -> impl IntoResponse {
    let ready = state.manager.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(serde_json::json!({ "ready": ready })))
}

pub fn build_router(manager: Arc<SchedulerManager>) -> Router {
    let state = RpcState { manager };
    Router::new()
        .route("/rpc/v1/select_destinations", post(select_destinations))
        .route("/healthz", get(healthz))
        .with_state(state)
}
