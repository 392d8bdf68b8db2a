//! Local cache of resource providers and their aggregate memberships.
//!
//! The cache is protected by a `std::sync::RwLock`. Lock hold time is a
//! map lookup or insert; no lock is ever held across a network call.
//! Writes only happen inside [`crate::PlacementClient`] methods, so readers
//! (filters, weighers) may observe state that a competing writer has since
//! changed. That staleness is corrected on the next conflicting write.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::types::ResourceProvider;

#[derive(Debug, Default)]
struct CacheInner {
    providers: HashMap<String, ResourceProvider>,
    aggregates: HashMap<String, BTreeSet<String>>,
    /// Custom resource classes already known to exist remotely.
    resource_classes: HashSet<String>,
    evictions: u64,
}

/// Shared provider cache.
#[derive(Debug, Default)]
pub struct ProviderCache {
    inner: RwLock<CacheInner>,
}

impl ProviderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uuid: &str) -> Option<ResourceProvider> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.providers.get(uuid).cloned()
    }

    pub fn contains(&self, uuid: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.providers.contains_key(uuid)
    }

    pub fn insert(&self, provider: ResourceProvider) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.providers.insert(provider.uuid.clone(), provider);
    }

    /// Record the generation last observed from placement.
    ///
    /// Returns the previous generation when it differed.
    pub fn set_generation(&self, uuid: &str, generation: u64) -> Option<u64> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let provider = inner.providers.get_mut(uuid)?;
        if provider.generation == generation {
            return None;
        }
        let previous = provider.generation;
        provider.generation = generation;
        Some(previous)
    }

    /// Drop a provider whose generation is known to be stale.
    pub fn evict(&self, uuid: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.providers.remove(uuid).is_some() {
            inner.evictions += 1;
            debug!(provider = %uuid, "evicted stale resource provider from cache");
        }
        inner.aggregates.remove(uuid);
    }

    /// Forget a provider that was deleted remotely.
    pub fn remove(&self, uuid: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.providers.remove(uuid);
        inner.aggregates.remove(uuid);
    }

    pub fn set_aggregates(&self, uuid: &str, aggregates: BTreeSet<String>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.aggregates.insert(uuid.to_string(), aggregates);
    }

    pub fn aggregates(&self, uuid: &str) -> Option<BTreeSet<String>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.aggregates.get(uuid).cloned()
    }

    pub fn has_resource_class(&self, name: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.resource_classes.contains(name)
    }

    pub fn add_resource_class(&self, name: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.resource_classes.insert(name.to_string());
    }

    /// Number of conflict-driven evictions since creation.
    pub fn eviction_count(&self) -> u64 {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.evictions
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
