//! Per-tenant TTL cache for integration listings.

use easemail_core::TenantId;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// In-process cache keyed by tenant, with explicit eviction for writes.
pub struct ListingCache<V: Send + Sync + 'static> {
    cache: Cache<TenantId, Arc<V>>,
}

impl<V: Send + Sync + 'static> ListingCache<V> {
    /// Creates a cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration, max_tenants: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_tenants)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    pub async fn get(&self, tenant_id: &TenantId) -> Option<Arc<V>> {
        self.cache.get(tenant_id).await
    }

    pub async fn set(&self, tenant_id: TenantId, value: Arc<V>) {
        self.cache.insert(tenant_id, value).await;
    }

    /// Evicts one tenant's entry.
    pub async fn invalidate(&self, tenant_id: &TenantId) {
        self.cache.invalidate(tenant_id).await;
    }

    /// Evicts every entry.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}
