//! Domain records the scheduler reads but does not own.
//!
//! Server groups, aggregate metadata and the affinity zone each placed
//! server landed in live in the surrounding system's database. The
//! scheduler reaches them through [`SchedulerCatalog`]; [`MemoryCatalog`]
//! backs tests and the daemon's file-seeded mode.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};

use ironyard_core::{Aggregate, ServerGroup};
use serde::Deserialize;
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};

/// Boxed future alias for catalog lookups.
pub type CatalogFuture<'a, T> = Pin<Box<dyn Future<Output = SchedulerResult<T>> + Send + 'a>>;

/// Read access to server groups and aggregates.
pub trait SchedulerCatalog: Send + Sync {
    fn server_group<'a>(&'a self, uuid: &'a str) -> CatalogFuture<'a, Option<ServerGroup>>;

    /// Aggregates carrying metadata `key`, restricted to `value` when given.
    fn aggregates_by_metadata<'a>(
        &'a self,
        key: &'a str,
        value: Option<&'a str>,
    ) -> CatalogFuture<'a, Vec<Aggregate>>;

    /// Affinity zone a placed server ended up in.
    fn server_affinity_zone<'a>(&'a self, server: &'a str) -> CatalogFuture<'a, Option<String>>;

    /// Record that `server` joined `group` in `affinity_zone`.
    fn record_placement<'a>(
        &'a self,
        group: &'a str,
        server: &'a str,
        affinity_zone: Option<&'a str>,
    ) -> CatalogFuture<'a, ()>;
}

/// Seed document for [`MemoryCatalog::from_file`].
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogSeed {
    aggregates: Vec<Aggregate>,
    server_groups: Vec<ServerGroup>,
    /// Server UUID → affinity zone.
    server_zones: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct CatalogData {
    aggregates: Vec<Aggregate>,
    server_groups: HashMap<String, ServerGroup>,
    server_zones: HashMap<String, String>,
}

/// In-memory catalog.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    data: RwLock<CatalogData>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{aggregates, server_groups, server_zones}` from a JSON file.
    pub fn from_file(path: &Path) -> SchedulerResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SchedulerError::Catalog(format!("read {}: {e}", path.display())))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> SchedulerResult<Self> {
        let seed: CatalogSeed = serde_json::from_str(content)
            .map_err(|e| SchedulerError::Catalog(format!("parse catalog: {e}")))?;
        let catalog = Self::new();
        for aggregate in seed.aggregates {
            catalog.add_aggregate(aggregate);
        }
        for group in seed.server_groups {
            catalog.add_server_group(group);
        }
        for (server, zone) in seed.server_zones {
            catalog.set_server_zone(&server, &zone);
        }
        Ok(catalog)
    }

    pub fn add_aggregate(&self, aggregate: Aggregate) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.aggregates.retain(|a| a.uuid != aggregate.uuid);
        data.aggregates.push(aggregate);
    }

    pub fn add_server_group(&self, group: ServerGroup) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.server_groups.insert(group.uuid.clone(), group);
    }

    pub fn set_server_zone(&self, server: &str, zone: &str) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.server_zones.insert(server.to_string(), zone.to_string());
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CatalogData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SchedulerCatalog for MemoryCatalog {
    fn server_group<'a>(&'a self, uuid: &'a str) -> CatalogFuture<'a, Option<ServerGroup>> {
        let group = self.read().server_groups.get(uuid).cloned();
        Box::pin(async move { Ok(group) })
    }

    fn aggregates_by_metadata<'a>(
        &'a self,
        key: &'a str,
        value: Option<&'a str>,
    ) -> CatalogFuture<'a, Vec<Aggregate>> {
        let found: Vec<Aggregate> = self
            .read()
            .aggregates
            .iter()
            .filter(|a| match (a.metadata.get(key), value) {
                (Some(v), Some(wanted)) => v == wanted,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .cloned()
            .collect();
        Box::pin(async move { Ok(found) })
    }

    fn server_affinity_zone<'a>(&'a self, server: &'a str) -> CatalogFuture<'a, Option<String>> {
        let zone = self.read().server_zones.get(server).cloned();
        Box::pin(async move { Ok(zone) })
    }

    fn record_placement<'a>(
        &'a self,
        group: &'a str,
        server: &'a str,
        affinity_zone: Option<&'a str>,
    ) -> CatalogFuture<'a, ()> {
        {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(g) = data.server_groups.get_mut(group) {
                if !g.members.iter().any(|m| m == server) {
                    g.members.push(server.to_string());
                }
            }
            if let Some(zone) = affinity_zone {
                data.server_zones.insert(server.to_string(), zone.to_string());
            }
        }
        debug!(%group, %server, zone = ?affinity_zone, "recorded group placement");
        Box::pin(async move { Ok(()) })
    }
}
