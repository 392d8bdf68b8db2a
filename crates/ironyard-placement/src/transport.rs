//! HTTP transport to the placement service.
//!
//! The client talks to placement through [`PlacementTransport`] so tests can
//! swap in an in-memory service. [`HyperTransport`] is the production
//! implementation: a pooled hyper client with a per-request timeout.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{PlacementError, PlacementResult};

/// Header carrying the requested placement microversion.
pub const MICROVERSION_HEADER: &str = "openstack-api-version";

/// A single call to the placement REST API.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementRequest {
    pub method: Method,
    /// Path plus optional query string, relative to the endpoint.
    pub path: String,
    /// Microversion to request; `None` means the baseline (1.0).
    pub microversion: Option<&'static str>,
    pub body: Option<serde_json::Value>,
}

impl PlacementRequest {
    /// Create a baseline-version request with no body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            microversion: None,
            body: None,
        }
    }

    /// `GET path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST path` with a JSON body.
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).json(body)
    }

    /// `PUT path` with a JSON body.
    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::PUT, path).json(body)
    }

    /// `DELETE path`.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Request `microversion` instead of the baseline.
    pub fn version(mut self, microversion: &'static str) -> Self {
        self.microversion = Some(microversion);
        self
    }

    /// Replace the body.
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Status and raw body of a placement response.
#[derive(Debug, Clone)]
pub struct PlacementResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl PlacementResponse {
    /// Create a response from a status and body.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// True for any 2xx status.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> PlacementResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| PlacementError::Decode(e.to_string()))
    }

    /// Body as lossy UTF-8, for logs and conflict-message inspection.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Boxed future alias for transport results.
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = PlacementResult<PlacementResponse>> + Send + 'a>>;

/// Sends requests to a placement service.
pub trait PlacementTransport: Send + Sync {
    fn send(&self, request: PlacementRequest) -> TransportFuture<'_>;
}

/// Placement transport over plain HTTP using hyper.
pub struct HyperTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    endpoint: String,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HyperTransport {
    /// Create a transport for the placement service at `endpoint`.
    ///
    /// `timeout` bounds each request, from sending it to reading the last
    /// byte of the response body.
    pub fn new(endpoint: &str, auth_token: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            auth_token,
            timeout,
        }
    }

    async fn round_trip(&self, request: PlacementRequest) -> PlacementResult<PlacementResponse> {
        let uri = format!("{}{}", self.endpoint, request.path);

        let mut builder = http::Request::builder()
            .method(request.method.clone())
            .uri(&uri)
            .header("accept", "application/json")
            .header("user-agent", "ironyard-scheduler/0.1");
        if let Some(version) = request.microversion {
            builder = builder.header(MICROVERSION_HEADER, format!("placement {version}"));
        }
        if let Some(token) = &self.auth_token {
            builder = builder.header("x-auth-token", token);
        }

        let body = match &request.body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                let bytes = serde_json::to_vec(json)
                    .map_err(|e| PlacementError::Transport(format!("encode body: {e}")))?;
                Full::new(Bytes::from(bytes))
            }
            None => Full::new(Bytes::new()),
        };

        let req = builder
            .body(body)
            .map_err(|e| PlacementError::Transport(format!("build request {uri}: {e}")))?;

        // One deadline for the headers and the whole body.
        let exchange = async {
            let resp = self
                .client
                .request(req)
                .await
                .map_err(|e| PlacementError::Transport(format!("{} {uri}: {e}", request.method)))?;
            let status = resp.status();
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| PlacementError::Transport(format!("read body of {uri}: {e}")))?
                .to_bytes();
            Ok::<_, PlacementError>((status, body))
        };
        let (status, body) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| PlacementError::Transport(format!("{} {uri} timed out", request.method)))??;

        debug!(method = %request.method, %uri, status = %status, "placement request");
        Ok(PlacementResponse { status, body })
    }
}

impl PlacementTransport for HyperTransport {
    fn send(&self, request: PlacementRequest) -> TransportFuture<'_> {
        Box::pin(self.round_trip(request))
    }
}
