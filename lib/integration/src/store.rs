//! Datastore abstraction for integration configs and tenant connections.

use crate::error::StoreError;
use crate::model::{Connection, IntegrationConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use easemail_core::{ConnectionId, IntegrationId, TenantId};
use rootcause::prelude::Report;
use tokio_util::sync::CancellationToken;

/// Everything the list broker needs for one tenant, read together.
#[derive(Debug, Clone, Default)]
pub struct TenantSnapshot {
    /// Every platform config row.
    pub configs: Vec<IntegrationConfig>,
    /// The tenant's active connections.
    pub connections: Vec<Connection>,
}

/// Persistence for [`IntegrationConfig`] and [`Connection`] records.
#[async_trait]
pub trait IntegrationStore: Send + Sync {
    /// Returns the platform config for an integration.
    async fn find_config(
        &self,
        integration_id: &IntegrationId,
    ) -> Result<Option<IntegrationConfig>, Report<StoreError>>;

    /// Returns every platform config.
    async fn list_configs(&self) -> Result<Vec<IntegrationConfig>, Report<StoreError>>;

    /// Inserts or replaces a platform config.
    async fn upsert_config(&self, config: &IntegrationConfig) -> Result<(), Report<StoreError>>;

    /// Returns a tenant's active connections, optionally for one integration.
    async fn list_active_connections(
        &self,
        tenant_id: &TenantId,
        integration_id: Option<&IntegrationId>,
    ) -> Result<Vec<Connection>, Report<StoreError>>;

    /// Returns a connection by id, including soft-deleted ones.
    async fn find_connection(
        &self,
        id: ConnectionId,
    ) -> Result<Option<Connection>, Report<StoreError>>;

    /// Inserts a new connection.
    async fn insert_connection(&self, connection: &Connection) -> Result<(), Report<StoreError>>;

    /// Overwrites a connection's mutable fields.
    async fn update_connection(&self, connection: &Connection) -> Result<(), Report<StoreError>>;

    /// Sets a connection's `last_used_at`.
    async fn touch_last_used(
        &self,
        id: ConnectionId,
        at: DateTime<Utc>,
    ) -> Result<(), Report<StoreError>>;

    /// Reads configs and the tenant's active connections.
    ///
    /// Implementations must stop work and return [`StoreError::Cancelled`]
    /// once `cancel` fires.
    async fn tenant_snapshot(
        &self,
        tenant_id: &TenantId,
        cancel: CancellationToken,
    ) -> Result<TenantSnapshot, Report<StoreError>>;
}
