//! Scheduler RPC facade.
//!
//! Callers reach the scheduler only through
//! [`SchedulerManager::select_destinations`]. The facade checks the caller's
//! API version, waits for the driver's first node refresh, and folds every
//! driver failure into an [`RpcError`]. `NoValidNode` is the one expected
//! outcome; anything else is reported as an unexpected fault.

use std::sync::Arc;
use std::time::Duration;

use ironyard_core::{FilterProperties, NodeUuid, RequestSpec};
use semver::Version;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::driver::SchedulerDriver;
use crate::error::SchedulerError;

/// RPC API version served by this manager.
pub const RPC_API_VERSION: &str = "1.0";

/// How often `select_destinations` re-checks driver readiness.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("No valid node was found. {0}")]
    NoValidNode(String),

    #[error("incompatible RPC version {requested} (server speaks {served})")]
    IncompatibleVersion { requested: String, served: String },

    #[error("unexpected scheduler error: {0}")]
    Unexpected(String),
}

impl RpcError {
    /// True for outcomes callers are expected to handle.
    pub fn is_expected(&self) -> bool {
        matches!(self, RpcError::NoValidNode(_))
    }
}

impl From<SchedulerError> for RpcError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::NoValidNode(reason) => RpcError::NoValidNode(reason),
            other => RpcError::Unexpected(other.to_string()),
        }
    }
}

/// `"1.0"` → `1.0.0`; full semver strings pass through.
fn parse_rpc_version(raw: &str) -> Option<Version> {
    let padded = match raw.matches('.').count() {
        0 => format!("{raw}.0.0"),
        1 => format!("{raw}.0"),
        _ => raw.to_string(),
    };
    Version::parse(&padded).ok()
}

/// A caller at `requested` may talk to a server at `served` when the majors
/// match and the caller needs no newer minor.
pub fn version_compatible(requested: &str, served: &str) -> bool {
    match (parse_rpc_version(requested), parse_rpc_version(served)) {
        (Some(req), Some(srv)) => req.major == srv.major && req.minor <= srv.minor,
        _ => false,
    }
}

pub struct SchedulerManager {
    driver: Arc<dyn SchedulerDriver>,
    ready_poll: Duration,
}

impl SchedulerManager {
    pub fn new(driver: Arc<dyn SchedulerDriver>) -> Self {
        Self {
            driver,
            ready_poll: READY_POLL_INTERVAL,
        }
    }

    pub fn with_ready_poll(mut self, interval: Duration) -> Self {
        self.ready_poll = interval;
        self
    }

    pub fn is_ready(&self) -> bool {
        self.driver.is_ready()
    }

    /// Pick one node per server in `request_spec`.
    ///
    /// A missing `version` is taken as the served version. The call blocks
    /// until the driver is ready; there is no timeout.
    pub async fn select_destinations(
        &self,
        version: Option<&str>,
        request_spec: RequestSpec,
        filter_properties: &mut FilterProperties,
    ) -> Result<Vec<NodeUuid>, RpcError> {
        let requested = version.unwrap_or(RPC_API_VERSION);
        if !version_compatible(requested, RPC_API_VERSION) {
            return Err(RpcError::IncompatibleVersion {
                requested: requested.to_string(),
                served: RPC_API_VERSION.to_string(),
            });
        }

        if !self.driver.is_ready() {
            info!("waiting for scheduler driver to become ready");
            while !self.driver.is_ready() {
                tokio::time::sleep(self.ready_poll).await;
            }
        }

        let request = request_spec.display_id();
        filter_properties.request_spec = request_spec;
        match self.driver.select_destinations(filter_properties).await {
            Ok(nodes) => Ok(nodes),
            Err(e) => {
                let rpc = RpcError::from(e);
                if rpc.is_expected() {
                    debug!(%request, error = %rpc, "no destination found");
                } else {
                    error!(%request, error = %rpc, "scheduling failed unexpectedly");
                }
                Err(rpc)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ScheduleFuture;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Becomes ready when told to; answers with a fixed outcome.
    struct StubDriver {
        ready: AtomicBool,
        fail_with: Option<fn() -> SchedulerError>,
    }

    impl StubDriver {
        fn ready() -> Self {
            Self {
                ready: AtomicBool::new(true),
                fail_with: None,
            }
        }
    }

    impl SchedulerDriver for StubDriver {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::Acquire)
        }

        fn select_destinations<'a>(&'a self, props: &'a mut FilterProperties) -> ScheduleFuture<'a> {
            let result = match self.fail_with {
                Some(make) => Err(make()),
                None => Ok(props
                    .request_spec
                    .server_uuids
                    .iter()
                    .map(|s| format!("node-for-{s}"))
                    .collect()),
            };
            Box::pin(async move { result })
        }
    }

    fn spec(servers: &[&str]) -> RequestSpec {
        RequestSpec {
            server_uuids: servers.iter().map(|s| s.to_string()).collect(),
            ..RequestSpec::default()
        }
    }

    #[test]
    fn version_rules() {
        assert!(version_compatible("1.0", "1.0"));
        assert!(version_compatible("1", "1.0"));
        assert!(version_compatible("1.0", "1.3"));
        assert!(!version_compatible("1.4", "1.3"));
        assert!(!version_compatible("2.0", "1.0"));
        assert!(!version_compatible("banana", "1.0"));
    }

    #[tokio::test]
    async fn incompatible_version_is_rejected_before_scheduling() {
        let manager = SchedulerManager::new(Arc::new(StubDriver::ready()));
        let mut props = FilterProperties::default();
        let err = manager
            .select_destinations(Some("2.0"), spec(&["s1"]), &mut props)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::IncompatibleVersion { .. }));
        assert!(!err.is_expected());
    }

    #[tokio::test]
    async fn request_spec_is_attached_to_properties() {
        let manager = SchedulerManager::new(Arc::new(StubDriver::ready()));
        let mut props = FilterProperties::default();
        let nodes = manager
            .select_destinations(None, spec(&["s1"]), &mut props)
            .await
            .unwrap();
        assert_eq!(nodes, vec!["node-for-s1".to_string()]);
        assert_eq!(props.request_spec.server_uuids, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn errors_are_classified() {
        let driver = StubDriver {
            ready: AtomicBool::new(true),
            fail_with: Some(|| SchedulerError::NoValidNode("nothing fits".to_string())),
        };
        let manager = SchedulerManager::new(Arc::new(driver));
        let err = manager
            .select_destinations(Some("1.0"), spec(&["s1"]), &mut FilterProperties::default())
            .await
            .unwrap_err();
        assert!(err.is_expected());
        assert_eq!(err.to_string(), "No valid node was found. nothing fits");

        let driver = StubDriver {
            ready: AtomicBool::new(true),
            fail_with: Some(|| SchedulerError::Catalog("db gone".to_string())),
        };
        let manager = SchedulerManager::new(Arc::new(driver));
        let err = manager
            .select_destinations(Some("1.0"), spec(&["s1"]), &mut FilterProperties::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Unexpected(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_driver_readiness() {
        let driver = Arc::new(StubDriver {
            ready: AtomicBool::new(false),
            fail_with: None,
        });
        let manager = Arc::new(SchedulerManager::new(driver.clone()));

        let task = tokio::spawn({
            let manager = manager.clone();
            async move {
                let mut props = FilterProperties::default();
                manager.select_destinations(None, spec(&["s1"]), &mut props).await
            }
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!task.is_finished());

        driver.ready.store(true, Ordering::Release);
        let nodes = task.await.unwrap().unwrap();
        assert_eq!(nodes, vec!["node-for-s1".to_string()]);
    }
}
