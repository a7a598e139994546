//! In-memory [`IntegrationStore`] for tests and local runs.

use crate::error::StoreError;
use crate::model::{Connection, IntegrationConfig};
use crate::store::{IntegrationStore, TenantSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use easemail_core::{ConnectionId, IntegrationId, TenantId};
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Stores records in process memory.
///
/// The fault knobs let tests simulate a slow or failing datastore.
#[derive(Debug, Default)]
pub struct MemoryStore {
    configs: RwLock<HashMap<IntegrationId, IntegrationConfig>>,
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    snapshot_delay: Option<Duration>,
    unavailable: AtomicBool,
    fail_touches: AtomicBool,
    fail_inserts: AtomicBool,
    touches: AtomicUsize,
    snapshots: AtomicUsize,
    cancelled_snapshots: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every snapshot by `delay` (cancellable).
    #[must_use]
    pub fn with_snapshot_delay(mut self, delay: Duration) -> Self {
        self.snapshot_delay = Some(delay);
        self
    }

    /// Makes every read and write fail while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes `touch_last_used` fail while set.
    pub fn set_fail_touches(&self, fail: bool) {
        self.fail_touches.store(fail, Ordering::SeqCst);
    }

    /// Makes `insert_connection` fail while set.
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Number of `touch_last_used` calls, successful or not.
    #[must_use]
    pub fn touch_count(&self) -> usize {
        self.touches.load(Ordering::SeqCst)
    }

    /// Number of snapshots started.
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }

    /// Number of snapshots that observed cancellation.
    #[must_use]
    pub fn cancelled_snapshot_count(&self) -> usize {
        self.cancelled_snapshots.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), Report<StoreError>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::QueryFailed {
                details: "store marked unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn active_connections(
        &self,
        tenant_id: &TenantId,
        integration_id: Option<&IntegrationId>,
    ) -> Vec<Connection> {
        let connections = self.connections.read().await;
        let mut found: Vec<Connection> = connections
            .values()
            .filter(|c| c.is_active && &c.tenant_id == tenant_id)
            .filter(|c| integration_id.is_none_or(|id| &c.integration_id == id))
            .cloned()
            .collect();
        found.sort_by_key(|c| c.created_at);
        found
    }
}

#[async_trait]
impl IntegrationStore for MemoryStore {
    async fn find_config(
        &self,
        integration_id: &IntegrationId,
    ) -> Result<Option<IntegrationConfig>, Report<StoreError>> {
        self.check_available()?;
        Ok(self.configs.read().await.get(integration_id).cloned())
    }

    async fn list_configs(&self) -> Result<Vec<IntegrationConfig>, Report<StoreError>> {
        self.check_available()?;
        let mut configs: Vec<_> = self.configs.read().await.values().cloned().collect();
        configs.sort_by(|a, b| a.integration_id.cmp(&b.integration_id));
        Ok(configs)
    }

    async fn upsert_config(&self, config: &IntegrationConfig) -> Result<(), Report<StoreError>> {
        self.check_available()?;
        self.configs
            .write()
            .await
            .insert(config.integration_id.clone(), config.clone());
        Ok(())
    }

    async fn list_active_connections(
        &self,
        tenant_id: &TenantId,
        integration_id: Option<&IntegrationId>,
    ) -> Result<Vec<Connection>, Report<StoreError>> {
        self.check_available()?;
        Ok(self.active_connections(tenant_id, integration_id).await)
    }

    async fn find_connection(
        &self,
        id: ConnectionId,
    ) -> Result<Option<Connection>, Report<StoreError>> {
        self.check_available()?;
        Ok(self.connections.read().await.get(&id).cloned())
    }

    async fn insert_connection(&self, connection: &Connection) -> Result<(), Report<StoreError>> {
        self.check_available()?;
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::QueryFailed {
                details: "insert rejected".to_string(),
            }
            .into());
        }
        self.connections
            .write()
            .await
            .insert(connection.id, connection.clone());
        Ok(())
    }

    async fn update_connection(&self, connection: &Connection) -> Result<(), Report<StoreError>> {
        self.check_available()?;
        let mut connections = self.connections.write().await;
        match connections.get_mut(&connection.id) {
            Some(existing) => {
                *existing = connection.clone();
                Ok(())
            }
            None => Err(StoreError::QueryFailed {
                details: format!("connection {} does not exist", connection.id),
            }
            .into()),
        }
    }

    async fn touch_last_used(
        &self,
        id: ConnectionId,
        at: DateTime<Utc>,
    ) -> Result<(), Report<StoreError>> {
        self.touches.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.fail_touches.load(Ordering::SeqCst) {
            return Err(StoreError::QueryFailed {
                details: "touch rejected".to_string(),
            }
            .into());
        }
        if let Some(connection) = self.connections.write().await.get_mut(&id) {
            connection.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn tenant_snapshot(
        &self,
        tenant_id: &TenantId,
        cancel: CancellationToken,
    ) -> Result<TenantSnapshot, Report<StoreError>> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.snapshot_delay {
            tokio::select! {
                () = cancel.cancelled() => {
                    self.cancelled_snapshots.fetch_add(1, Ordering::SeqCst);
                    return Err(StoreError::Cancelled.into());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
        self.check_available()?;
        Ok(TenantSnapshot {
            configs: self.list_configs().await?,
            connections: self.active_connections(tenant_id, None).await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IntegrationMode;

    fn tenant(id: &str) -> TenantId {
        TenantId::parse(id).expect("valid tenant")
    }

    #[tokio::test]
    async fn connections_are_scoped_and_soft_deleted() {
        let store = MemoryStore::new();
        let stripe = IntegrationId::from_static("stripe");
        let openai = IntegrationId::from_static("openai");

        let a = Connection::new(tenant("t1"), stripe.clone(), "a");
        let b = Connection::new(tenant("t1"), openai.clone(), "b");
        let mut c = Connection::new(tenant("t2"), stripe.clone(), "c");
        c.deactivate();
        for conn in [&a, &b, &c] {
            store.insert_connection(conn).await.expect("insert");
        }

        let all = store.list_active_connections(&tenant("t1"), None).await.expect("list");
        assert_eq!(all.len(), 2);
        let only = store
            .list_active_connections(&tenant("t1"), Some(&stripe))
            .await
            .expect("list");
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].id, a.id);
        assert!(store
            .list_active_connections(&tenant("t2"), None)
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn touch_updates_last_used() {
        let store = MemoryStore::new();
        let conn = Connection::new(tenant("t1"), IntegrationId::from_static("stripe"), "a");
        store.insert_connection(&conn).await.expect("insert");

        let at = Utc::now();
        store.touch_last_used(conn.id, at).await.expect("touch");
        let found = store.find_connection(conn.id).await.expect("find").expect("exists");
        assert_eq!(found.last_used_at, Some(at));
        assert_eq!(store.touch_count(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_reads() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.list_configs().await.is_err());
        store.set_unavailable(false);
        assert!(store.list_configs().await.is_ok());
    }

    #[tokio::test]
    async fn update_requires_existing_row() {
        let store = MemoryStore::new();
        let conn = Connection::new(tenant("t1"), IntegrationId::from_static("stripe"), "a");
        assert!(store.update_connection(&conn).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_snapshot_observes_cancellation() {
        let store = MemoryStore::new().with_snapshot_delay(Duration::from_secs(60));
        store
            .upsert_config(&IntegrationConfig::new(
                IntegrationId::from_static("openai"),
                IntegrationMode::Byok,
            ))
            .await
            .expect("upsert");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = store.tenant_snapshot(&tenant("t1"), cancel).await;
        assert!(result.is_err());
        assert_eq!(store.cancelled_snapshot_count(), 1);
    }
}
