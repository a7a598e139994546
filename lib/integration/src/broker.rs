//! Connection broker: tenant-facing listing, health and connection
//! management.
//!
//! Listings are served from a per-tenant TTL cache. A cold listing reads a
//! [`TenantSnapshot`] under a hard timeout; on timeout the in-flight query is
//! cancelled and the caller receives a structurally valid, empty listing
//! with a retry hint. Every write evicts the affected cache entries.

use crate::cache::ListingCache;
use crate::catalog::{Catalog, Category, IntegrationDefinition};
use crate::credential::{ACCESS_TOKEN_FIELD, CredentialMap, REFRESH_TOKEN_FIELD};
use crate::error::{BrokerError, StoreError};
use crate::model::{Connection, ConnectionSummary, IntegrationConfig, IntegrationMode};
use crate::oauth::{RefreshedTokens, TokenRefresher};
use crate::resolver::CredentialResolver;
use crate::store::{IntegrationStore, TenantSnapshot};
use crate::validator::{ValidationErrorCode, ValidationResult, ValidatorSet};
use crate::vault::{CredentialVault, mask_map};
use chrono::{DateTime, Utc};
use easemail_core::{ConnectionId, IntegrationId, TenantId};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Tunables for the broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// How long a tenant listing stays cached.
    pub cache_ttl: Duration,
    /// Hard limit on the listing snapshot query.
    pub query_timeout: Duration,
    /// `retryAfter` hint in degraded listings, in seconds.
    pub retry_after_secs: u64,
    /// Upper bound on cached tenant listings.
    pub cache_max_tenants: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(10),
            query_timeout: Duration::from_secs(8),
            retry_after_secs: 10,
            cache_max_tenants: 10_000,
        }
    }
}

/// Counts shown above the integration list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingStats {
    pub total: usize,
    pub connected: usize,
    pub included: usize,
    pub byok: usize,
}

/// One visible integration with the tenant's view of it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationEntry {
    #[serde(flatten)]
    pub definition: IntegrationDefinition,
    pub mode: IntegrationMode,
    /// False when the platform has no config row yet.
    pub is_configured: bool,
    pub is_connected: bool,
    pub connections: Vec<ConnectionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_instructions: Option<String>,
}

/// Response of [`ConnectionBroker::list_integrations`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationListing {
    pub success: bool,
    pub integrations: Vec<IntegrationEntry>,
    pub by_category: BTreeMap<Category, Vec<IntegrationId>>,
    pub stats: ListingStats,
    pub categories: Vec<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntegrationListing {
    /// The empty listing served when the datastore cannot answer in time.
    #[must_use]
    pub fn degraded(retry_after_secs: u64, error: impl Into<String>) -> Self {
        Self {
            success: false,
            integrations: Vec::new(),
            by_category: BTreeMap::new(),
            stats: ListingStats::default(),
            categories: Category::ALL.to_vec(),
            retry_after: Some(retry_after_secs),
            error: Some(error.into()),
        }
    }

    /// True for the fallback listing served when live data is unavailable.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.success
    }
}

/// Response of [`ConnectionBroker::integration_status`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationStatus {
    pub integration_id: IntegrationId,
    pub mode: IntegrationMode,
    pub is_configured: bool,
    pub is_connected: bool,
    pub connections: Vec<ConnectionSummary>,
}

/// Outcome bucket of one connection in a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Expired,
    /// The integration has no validator.
    Unchecked,
}

impl HealthStatus {
    fn from_validation(validation: Option<&ValidationResult>) -> Self {
        match validation {
            None => Self::Unchecked,
            Some(result) if result.success => Self::Healthy,
            Some(result) if result.error_code.is_some_and(|c| c.is_expiry()) => Self::Expired,
            Some(_) => Self::Unhealthy,
        }
    }
}

/// Health of one connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHealth {
    pub connection_id: ConnectionId,
    pub integration_id: IntegrationId,
    pub name: String,
    pub account_email: Option<String>,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub expired: usize,
    pub unchecked: usize,
}

impl HealthSummary {
    fn tally(connections: &[ConnectionHealth]) -> Self {
        let mut summary = Self {
            total: connections.len(),
            ..Self::default()
        };
        for connection in connections {
            match connection.status {
                HealthStatus::Healthy => summary.healthy += 1,
                HealthStatus::Unhealthy => summary.unhealthy += 1,
                HealthStatus::Expired => summary.expired += 1,
                HealthStatus::Unchecked => summary.unchecked += 1,
            }
        }
        summary
    }
}

/// Response of [`ConnectionBroker::health_check`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub summary: HealthSummary,
    pub connections: Vec<ConnectionHealth>,
}

/// Body of a connect request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub account_email: Option<String>,
    pub credentials: CredentialMap,
    /// Expiry of an OAuth access token passed in `credentials`.
    #[serde(default)]
    pub token_expires_at: Option<DateTime<Utc>>,
}

/// Body of a connection update. Absent fields are left unchanged;
/// credentials are merged over the stored ones.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConnectionRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub credentials: Option<CredentialMap>,
}

/// Body of an admin platform-config write.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfigRequest {
    pub mode: IntegrationMode,
    /// Platform credentials; kept from the existing row when absent.
    #[serde(default)]
    pub credentials: Option<CredentialMap>,
    #[serde(default)]
    pub markup_percent: Option<f64>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub setup_instructions: Option<String>,
}

/// Admin view of a platform config. Credentials are masked.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfigView {
    pub integration_id: IntegrationId,
    pub mode: IntegrationMode,
    pub is_active: bool,
    pub markup_percent: f64,
    pub setup_instructions: Option<String>,
    pub masked_credentials: Option<BTreeMap<String, String>>,
    pub updated_at: DateTime<Utc>,
}

/// Tenant-facing operations over the catalog, platform configs and tenant
/// connections.
pub struct ConnectionBroker {
    catalog: Arc<Catalog>,
    store: Arc<dyn IntegrationStore>,
    vault: Arc<CredentialVault>,
    resolver: CredentialResolver,
    validators: Arc<ValidatorSet>,
    refresher: Option<Arc<TokenRefresher>>,
    cache: ListingCache<IntegrationListing>,
    config: BrokerConfig,
}

impl ConnectionBroker {
    #[must_use]
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<dyn IntegrationStore>,
        vault: Arc<CredentialVault>,
        validators: Arc<ValidatorSet>,
        config: BrokerConfig,
    ) -> Self {
        let resolver = CredentialResolver::new(Arc::clone(&store), Arc::clone(&vault));
        Self {
            cache: ListingCache::new(config.cache_ttl, config.cache_max_tenants),
            catalog,
            store,
            vault,
            resolver,
            validators,
            refresher: None,
            config,
        }
    }

    /// Enables OAuth token refresh.
    #[must_use]
    pub fn with_refresher(mut self, refresher: Arc<TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    /// Lists the integrations visible to a tenant.
    ///
    /// Never fails: a slow or failing datastore yields
    /// [`IntegrationListing::degraded`], which is not cached.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn list_integrations(&self, tenant_id: &TenantId) -> Arc<IntegrationListing> {
        if let Some(listing) = self.cache.get(tenant_id).await {
            debug!("listing served from cache");
            return listing;
        }

        match self.load_snapshot(tenant_id).await {
            Ok(snapshot) => {
                let listing = Arc::new(self.build_listing(snapshot));
                self.cache.set(tenant_id.clone(), Arc::clone(&listing)).await;
                listing
            }
            Err(e) => {
                warn!(error = %e, "serving degraded listing");
                Arc::new(IntegrationListing::degraded(
                    self.config.retry_after_secs,
                    "Integration data is temporarily unavailable",
                ))
            }
        }
    }

    /// Connection status of one integration, read fresh from the store.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIntegration` for ids outside the catalog.
    pub async fn integration_status(
        &self,
        tenant_id: &TenantId,
        integration_id: &IntegrationId,
    ) -> Result<IntegrationStatus, BrokerError> {
        let definition = self.definition(integration_id)?;
        let config = self
            .store
            .find_config(integration_id)
            .await
            .map_err(storage)?;
        let connections = self
            .store
            .list_active_connections(tenant_id, Some(integration_id))
            .await
            .map_err(storage)?;

        Ok(IntegrationStatus {
            integration_id: integration_id.clone(),
            mode: listing_mode(definition, config.as_ref()),
            is_configured: config.is_some(),
            is_connected: !connections.is_empty(),
            connections: connections.iter().map(Connection::summary).collect(),
        })
    }

    /// Validates every active connection of a tenant in parallel.
    ///
    /// A failing validator only affects its own entry.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the connections cannot be listed.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn health_check(&self, tenant_id: &TenantId) -> Result<HealthReport, BrokerError> {
        let connections = self
            .store
            .list_active_connections(tenant_id, None)
            .await
            .map_err(storage)?;

        let checks = connections.iter().map(|connection| async move {
            let validation = match self.resolver.decrypt_connection(connection) {
                Ok(material) => {
                    self.validators
                        .validate(&connection.integration_id, &material)
                        .await
                }
                Err(e) => Some(ValidationResult::failure(
                    ValidationErrorCode::UnknownError,
                    e.to_string(),
                )),
            };
            ConnectionHealth {
                connection_id: connection.id,
                integration_id: connection.integration_id.clone(),
                name: connection.name.clone(),
                account_email: connection.account_email.clone(),
                status: HealthStatus::from_validation(validation.as_ref()),
                validation,
            }
        });
        let connections = futures::future::join_all(checks).await;
        let summary = HealthSummary::tally(&connections);
        info!(
            total = summary.total,
            healthy = summary.healthy,
            unhealthy = summary.unhealthy,
            expired = summary.expired,
            "health check complete"
        );
        Ok(HealthReport {
            summary,
            connections,
        })
    }

    /// Stores a new BYOK connection.
    ///
    /// An existing active connection for the same account is replaced.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIntegration`, `ModeNotByok` or `MissingCredentials`
    /// when the request is rejected.
    #[instrument(skip(self, request), fields(tenant_id = %tenant_id, integration_id = %integration_id))]
    pub async fn connect(
        &self,
        tenant_id: &TenantId,
        integration_id: &IntegrationId,
        request: ConnectRequest,
    ) -> Result<ConnectionSummary, BrokerError> {
        let definition = self.definition(integration_id)?;
        let config = self
            .store
            .find_config(integration_id)
            .await
            .map_err(storage)?;
        let mode = listing_mode(definition, config.as_ref());
        if mode != IntegrationMode::Byok {
            return Err(BrokerError::ModeNotByok {
                integration_id: integration_id.clone(),
                mode: mode.to_string(),
            });
        }

        let missing = request
            .credentials
            .missing(connection_fields(definition).iter().copied());
        if !missing.is_empty() {
            return Err(BrokerError::MissingCredentials { fields: missing });
        }

        let existing = self
            .store
            .list_active_connections(tenant_id, Some(integration_id))
            .await
            .map_err(storage)?;

        let name = request
            .name
            .unwrap_or_else(|| definition.name.to_string());
        let mut connection = Connection::new(tenant_id.clone(), integration_id.clone(), name);
        connection.account_email = request.account_email;
        connection.token_expires_at = request.token_expires_at;
        self.seal_credentials(&mut connection, request.credentials)?;

        // The previous connection stays active until its replacement is stored.
        self.store
            .insert_connection(&connection)
            .await
            .map_err(storage)?;
        self.cache.invalidate(tenant_id).await;

        for mut previous in existing
            .into_iter()
            .filter(|c| c.id != connection.id && c.account_email == connection.account_email)
        {
            previous.deactivate();
            self.store
                .update_connection(&previous)
                .await
                .map_err(storage)?;
            debug!(connection_id = %previous.id, "replaced previous connection");
        }

        info!(connection_id = %connection.id, "connection created");
        Ok(connection.summary())
    }

    /// Renames a connection or merges new credential fields into it.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionNotFound` or `MissingCredentials`.
    #[instrument(skip(self, request), fields(tenant_id = %tenant_id, connection_id = %connection_id))]
    pub async fn update_connection(
        &self,
        tenant_id: &TenantId,
        integration_id: &IntegrationId,
        connection_id: ConnectionId,
        request: UpdateConnectionRequest,
    ) -> Result<ConnectionSummary, BrokerError> {
        let definition = self.definition(integration_id)?;
        let mut connection = self
            .owned_connection(tenant_id, integration_id, connection_id)
            .await?;

        if let Some(name) = request.name {
            connection.name = name;
        }
        if let Some(update) = request.credentials {
            let mut credentials = self
                .resolver
                .decrypt_connection(&connection)
                .map_err(|e| BrokerError::Vault {
                    details: e.to_string(),
                })?
                .credentials;
            credentials.merge(update);
            let missing = credentials.missing(connection_fields(definition).iter().copied());
            if !missing.is_empty() {
                return Err(BrokerError::MissingCredentials { fields: missing });
            }
            self.seal_credentials(&mut connection, credentials)?;
            connection.mark_active();
        }
        connection.updated_at = Utc::now();

        self.store
            .update_connection(&connection)
            .await
            .map_err(storage)?;
        self.cache.invalidate(tenant_id).await;
        Ok(connection.summary())
    }

    /// Soft-deletes a connection.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionNotFound` if the tenant has no such active
    /// connection.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, connection_id = %connection_id))]
    pub async fn disconnect(
        &self,
        tenant_id: &TenantId,
        integration_id: &IntegrationId,
        connection_id: ConnectionId,
    ) -> Result<(), BrokerError> {
        let mut connection = self
            .owned_connection(tenant_id, integration_id, connection_id)
            .await?;
        connection.deactivate();
        self.store
            .update_connection(&connection)
            .await
            .map_err(storage)?;
        self.cache.invalidate(tenant_id).await;
        info!("connection removed");
        Ok(())
    }

    /// Validates one connection live and records the outcome as its status.
    ///
    /// An expired OAuth token is refreshed first when a refresh token and
    /// an OAuth client are available.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionNotFound` or `NoValidator`. A failed validation is
    /// a successful call returning a failed [`ValidationResult`].
    #[instrument(skip(self), fields(tenant_id = %tenant_id, connection_id = %connection_id))]
    pub async fn test_connection(
        &self,
        tenant_id: &TenantId,
        integration_id: &IntegrationId,
        connection_id: ConnectionId,
    ) -> Result<ValidationResult, BrokerError> {
        let mut connection = self
            .owned_connection(tenant_id, integration_id, connection_id)
            .await?;
        if !self.validators.has_validator(integration_id) {
            return Err(BrokerError::NoValidator {
                integration_id: integration_id.clone(),
            });
        }

        let mut material = self
            .resolver
            .decrypt_connection(&connection)
            .map_err(|e| BrokerError::Vault {
                details: e.to_string(),
            })?;
        if material.is_expired()
            && let (Some(refresh_token), Some(refresher)) =
                (material.refresh_token(), self.refresher_for(integration_id))
        {
            match refresher.refresh(integration_id, refresh_token).await {
                Ok(tokens) => {
                    self.apply_refresh(&mut connection, tokens)?;
                    material = self
                        .resolver
                        .decrypt_connection(&connection)
                        .map_err(|e| BrokerError::Vault {
                            details: e.to_string(),
                        })?;
                }
                Err(e) => warn!(error = %e, "refresh before validation failed"),
            }
        }

        let result = self
            .validators
            .validate(integration_id, &material)
            .await
            .ok_or_else(|| BrokerError::NoValidator {
                integration_id: integration_id.clone(),
            })?;

        match result.error_code {
            None => connection.mark_active(),
            Some(code) if code.is_expiry() => connection.mark_expired(result.message.clone()),
            Some(_) => connection.mark_error(result.message.clone()),
        }
        self.store
            .update_connection(&connection)
            .await
            .map_err(storage)?;
        self.cache.invalidate(tenant_id).await;

        info!(success = result.success, status = connection.status.as_str(), "connection tested");
        Ok(result)
    }

    /// Exchanges the connection's refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// Returns `OAuthNotConfigured`, `NoRefreshToken` or `RefreshFailed`.
    /// A rejected refresh also marks the connection expired.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, connection_id = %connection_id))]
    pub async fn refresh_connection(
        &self,
        tenant_id: &TenantId,
        integration_id: &IntegrationId,
        connection_id: ConnectionId,
    ) -> Result<ConnectionSummary, BrokerError> {
        let mut connection = self
            .owned_connection(tenant_id, integration_id, connection_id)
            .await?;
        let refresher =
            self.refresher_for(integration_id)
                .ok_or_else(|| BrokerError::OAuthNotConfigured {
                    integration_id: integration_id.clone(),
                })?;
        let blob = connection
            .refresh_token_encrypted
            .as_deref()
            .ok_or(BrokerError::NoRefreshToken { connection_id })?;
        let refresh_token = self.vault.decrypt_secret(blob).map_err(vault)?;

        match refresher.refresh(integration_id, &refresh_token).await {
            Ok(tokens) => self.apply_refresh(&mut connection, tokens)?,
            Err(e) => {
                connection.mark_expired(format!("Token refresh failed: {e}"));
                self.store
                    .update_connection(&connection)
                    .await
                    .map_err(storage)?;
                self.cache.invalidate(tenant_id).await;
                return Err(BrokerError::RefreshFailed {
                    details: e.to_string(),
                });
            }
        }

        self.store
            .update_connection(&connection)
            .await
            .map_err(storage)?;
        self.cache.invalidate(tenant_id).await;
        info!("connection tokens refreshed");
        Ok(connection.summary())
    }

    /// Writes the platform config for an integration and evicts every
    /// cached listing.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIntegration`, or `MissingCredentials` when INCLUDED
    /// credentials lack a required field.
    #[instrument(skip(self, request), fields(integration_id = %integration_id))]
    pub async fn set_platform_config(
        &self,
        integration_id: &IntegrationId,
        request: PlatformConfigRequest,
    ) -> Result<PlatformConfigView, BrokerError> {
        let definition = self.definition(integration_id)?;
        let mut config = self
            .store
            .find_config(integration_id)
            .await
            .map_err(storage)?
            .unwrap_or_else(|| IntegrationConfig::new(integration_id.clone(), request.mode));

        config.mode = request.mode;
        if let Some(credentials) = &request.credentials {
            if request.mode == IntegrationMode::Included {
                let missing = credentials.missing(definition.required_fields());
                if !missing.is_empty() {
                    return Err(BrokerError::MissingCredentials { fields: missing });
                }
            }
            config.credentials_encrypted = Some(self.vault.encrypt(credentials).map_err(vault)?);
        }
        if let Some(markup) = request.markup_percent {
            config.markup_percent = markup;
        }
        if let Some(active) = request.is_active {
            config.is_active = active;
        }
        if request.setup_instructions.is_some() {
            config.setup_instructions = request.setup_instructions;
        }
        config.updated_at = Utc::now();

        self.store.upsert_config(&config).await.map_err(storage)?;
        self.cache.invalidate_all();
        info!(mode = %config.mode, active = config.is_active, "platform config updated");

        let masked_credentials = match config.credentials_encrypted.as_deref() {
            Some(blob) => Some(mask_map(&self.vault.decrypt(blob).map_err(vault)?)),
            None => None,
        };
        Ok(PlatformConfigView {
            integration_id: config.integration_id,
            mode: config.mode,
            is_active: config.is_active,
            markup_percent: config.markup_percent,
            setup_instructions: config.setup_instructions,
            masked_credentials,
            updated_at: config.updated_at,
        })
    }

    fn definition(&self, integration_id: &IntegrationId) -> Result<&IntegrationDefinition, BrokerError> {
        self.catalog
            .get(integration_id)
            .ok_or_else(|| BrokerError::UnknownIntegration {
                integration_id: integration_id.clone(),
            })
    }

    fn refresher_for(&self, integration_id: &IntegrationId) -> Option<&TokenRefresher> {
        self.refresher
            .as_deref()
            .filter(|r| r.has_client(integration_id))
    }

    async fn owned_connection(
        &self,
        tenant_id: &TenantId,
        integration_id: &IntegrationId,
        connection_id: ConnectionId,
    ) -> Result<Connection, BrokerError> {
        self.store
            .find_connection(connection_id)
            .await
            .map_err(storage)?
            .filter(|c| c.is_owned_by(tenant_id, integration_id))
            .ok_or(BrokerError::ConnectionNotFound { connection_id })
    }

    /// Reads the tenant snapshot, cancelling it once the timeout elapses or
    /// the caller goes away.
    async fn load_snapshot(&self, tenant_id: &TenantId) -> Result<TenantSnapshot, Report<StoreError>> {
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();

        let store = Arc::clone(&self.store);
        let tenant = tenant_id.clone();
        let token = cancel.clone();
        let mut query = tokio::spawn(async move { store.tenant_snapshot(&tenant, token).await });

        tokio::select! {
            joined = &mut query => match joined {
                Ok(result) => result,
                Err(e) => Err(StoreError::QueryFailed {
                    details: format!("snapshot task failed: {e}"),
                }
                .into()),
            },
            () = tokio::time::sleep(self.config.query_timeout) => {
                cancel.cancel();
                Err(StoreError::QueryFailed {
                    details: format!("snapshot timed out after {:?}", self.config.query_timeout),
                }
                .into())
            }
        }
    }

    fn build_listing(&self, snapshot: TenantSnapshot) -> IntegrationListing {
        let configs: HashMap<_, _> = snapshot
            .configs
            .into_iter()
            .map(|c| (c.integration_id.clone(), c))
            .collect();
        let mut connections: HashMap<IntegrationId, Vec<ConnectionSummary>> = HashMap::new();
        for connection in &snapshot.connections {
            connections
                .entry(connection.integration_id.clone())
                .or_default()
                .push(connection.summary());
        }

        let mut stats = ListingStats::default();
        let mut by_category: BTreeMap<Category, Vec<IntegrationId>> = BTreeMap::new();
        let mut integrations = Vec::new();
        for definition in self.catalog.iter() {
            let config = configs.get(&definition.id);
            let mode = listing_mode(definition, config);
            if mode == IntegrationMode::Disabled {
                continue;
            }
            let connections = connections.remove(&definition.id).unwrap_or_default();
            let is_connected = !connections.is_empty();

            stats.total += 1;
            stats.connected += usize::from(is_connected);
            match mode {
                IntegrationMode::Included => stats.included += 1,
                IntegrationMode::Byok => stats.byok += 1,
                IntegrationMode::Disabled => {}
            }
            by_category
                .entry(definition.category)
                .or_default()
                .push(definition.id.clone());
            integrations.push(IntegrationEntry {
                definition: definition.clone(),
                mode,
                is_configured: config.is_some(),
                is_connected,
                connections,
                setup_instructions: config.and_then(|c| c.setup_instructions.clone()),
            });
        }

        IntegrationListing {
            success: true,
            integrations,
            by_category,
            stats,
            categories: Category::ALL.to_vec(),
            retry_after: None,
            error: None,
        }
    }

    fn seal_credentials(
        &self,
        connection: &mut Connection,
        mut credentials: CredentialMap,
    ) -> Result<(), BrokerError> {
        let access_token = credentials.remove(ACCESS_TOKEN_FIELD);
        let refresh_token = credentials.remove(REFRESH_TOKEN_FIELD);

        connection.credentials_encrypted = if credentials.is_empty() {
            None
        } else {
            Some(self.vault.encrypt(&credentials).map_err(vault)?)
        };
        connection.access_token_encrypted = access_token
            .map(|t| self.vault.encrypt_secret(&t))
            .transpose()
            .map_err(vault)?;
        connection.refresh_token_encrypted = refresh_token
            .map(|t| self.vault.encrypt_secret(&t))
            .transpose()
            .map_err(vault)?;
        Ok(())
    }

    fn apply_refresh(
        &self,
        connection: &mut Connection,
        tokens: RefreshedTokens,
    ) -> Result<(), BrokerError> {
        connection.access_token_encrypted =
            Some(self.vault.encrypt_secret(&tokens.access_token).map_err(vault)?);
        if let Some(rotated) = &tokens.refresh_token {
            connection.refresh_token_encrypted =
                Some(self.vault.encrypt_secret(rotated).map_err(vault)?);
        }
        connection.token_expires_at = tokens.expires_at;
        connection.mark_active();
        Ok(())
    }
}

/// The mode a tenant sees: the config's effective mode, or the catalog
/// default before the platform has written a config row.
fn listing_mode(definition: &IntegrationDefinition, config: Option<&IntegrationConfig>) -> IntegrationMode {
    config.map_or(definition.default_mode, IntegrationConfig::effective_mode)
}

/// Fields a tenant connection must carry.
fn connection_fields(definition: &IntegrationDefinition) -> Vec<&'static str> {
    let mut fields = definition.required_fields();
    if definition.is_oauth() && !fields.contains(&ACCESS_TOKEN_FIELD) {
        fields.push(ACCESS_TOKEN_FIELD);
    }
    fields
}

fn storage(e: Report<StoreError>) -> BrokerError {
    BrokerError::Storage {
        details: e.to_string(),
    }
}

fn vault(e: Report<crate::error::VaultError>) -> BrokerError {
    BrokerError::Vault {
        details: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::oauth::OAuthClientConfig;
    use crate::validator::GenericOAuthValidator;
    use httpmock::prelude::*;
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryStore>,
        vault: Arc<CredentialVault>,
        broker: ConnectionBroker,
    }

    fn fixture_with(store: MemoryStore, validators: ValidatorSet, config: BrokerConfig) -> Fixture {
        let store = Arc::new(store);
        let vault = Arc::new(CredentialVault::new([9u8; 32]));
        let broker = ConnectionBroker::new(
            Arc::new(Catalog::builtin()),
            store.clone(),
            vault.clone(),
            Arc::new(validators),
            config,
        );
        Fixture {
            store,
            vault,
            broker,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            MemoryStore::new(),
            ValidatorSet::new(reqwest::Client::new()),
            BrokerConfig::default(),
        )
    }

    fn tenant() -> TenantId {
        TenantId::parse("t1").expect("valid tenant")
    }

    fn id(value: &'static str) -> IntegrationId {
        IntegrationId::from_static(value)
    }

    async fn configure(store: &MemoryStore, integration: &'static str, mode: IntegrationMode) {
        store
            .upsert_config(&IntegrationConfig::new(id(integration), mode))
            .await
            .expect("upsert");
    }

    fn api_key(value: &str) -> ConnectRequest {
        ConnectRequest {
            credentials: CredentialMap::new().with("apiKey", value),
            ..ConnectRequest::default()
        }
    }

    #[tokio::test]
    async fn byok_connect_then_resolve() {
        let f = fixture();
        configure(&f.store, "openai", IntegrationMode::Byok).await;

        let status = f
            .broker
            .integration_status(&tenant(), &id("openai"))
            .await
            .expect("status");
        assert!(!status.is_connected);

        let summary = f
            .broker
            .connect(&tenant(), &id("openai"), api_key("sk-test"))
            .await
            .expect("connect");
        assert_eq!(summary.name, "OpenAI");

        let resolved = f
            .broker
            .resolver()
            .resolve(&id("openai"), &tenant(), None)
            .await
            .expect("resolve");
        assert_eq!(resolved.mode, IntegrationMode::Byok);
        assert_eq!(resolved.credentials.get("apiKey"), Some("sk-test"));
        assert_eq!(resolved.connection_id, Some(summary.id));

        let status = f
            .broker
            .integration_status(&tenant(), &id("openai"))
            .await
            .expect("status");
        assert!(status.is_connected);
    }

    #[tokio::test]
    async fn connect_rejects_non_byok_and_missing_fields() {
        let f = fixture();
        configure(&f.store, "openai", IntegrationMode::Included).await;
        configure(&f.store, "stripe", IntegrationMode::Byok).await;

        let err = f
            .broker
            .connect(&tenant(), &id("openai"), api_key("sk-test"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MODE_NOT_BYOK");

        let err = f
            .broker
            .connect(&tenant(), &id("stripe"), api_key("sk-test"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MISSING_CREDENTIALS");
        assert!(err.to_string().contains("secretKey"));

        let err = f
            .broker
            .connect(&tenant(), &id("nonexistent"), api_key("x"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_INTEGRATION");
    }

    #[tokio::test]
    async fn reconnecting_replaces_previous_connection() {
        let f = fixture();
        configure(&f.store, "openai", IntegrationMode::Byok).await;
        let first = f
            .broker
            .connect(&tenant(), &id("openai"), api_key("sk-old"))
            .await
            .expect("connect");
        f.broker
            .connect(&tenant(), &id("openai"), api_key("sk-new"))
            .await
            .expect("connect");

        let active = f
            .store
            .list_active_connections(&tenant(), Some(&id("openai")))
            .await
            .expect("list");
        assert_eq!(active.len(), 1);
        assert_ne!(active[0].id, first.id);
    }

    #[tokio::test]
    async fn failed_reconnect_keeps_previous_connection() {
        let f = fixture();
        configure(&f.store, "openai", IntegrationMode::Byok).await;
        let first = f
            .broker
            .connect(&tenant(), &id("openai"), api_key("sk-old"))
            .await
            .expect("connect");

        f.store.set_fail_inserts(true);
        let err = f
            .broker
            .connect(&tenant(), &id("openai"), api_key("sk-new"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_ERROR");
        f.store.set_fail_inserts(false);

        let active = f
            .store
            .list_active_connections(&tenant(), Some(&id("openai")))
            .await
            .expect("list");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, first.id);

        let resolved = f
            .broker
            .resolver()
            .resolve(&id("openai"), &tenant(), None)
            .await
            .expect("resolve");
        assert_eq!(resolved.credentials.get("apiKey"), Some("sk-old"));
    }

    #[tokio::test]
    async fn oauth_tokens_are_stored_separately() {
        let f = fixture();
        configure(&f.store, "msgraph", IntegrationMode::Byok).await;
        let request = ConnectRequest {
            account_email: Some("ops@example.com".to_string()),
            credentials: CredentialMap::new()
                .with(ACCESS_TOKEN_FIELD, "at")
                .with(REFRESH_TOKEN_FIELD, "rt"),
            token_expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            ..ConnectRequest::default()
        };
        let summary = f
            .broker
            .connect(&tenant(), &id("msgraph"), request)
            .await
            .expect("connect");
        assert!(summary.has_refresh_token);

        let stored = f
            .store
            .find_connection(summary.id)
            .await
            .expect("find")
            .expect("exists");
        assert!(stored.credentials_encrypted.is_none());
        assert!(stored.access_token_encrypted.is_some());
    }

    #[tokio::test]
    async fn listing_hides_disabled_and_counts_connections() {
        let f = fixture();
        configure(&f.store, "openai", IntegrationMode::Byok).await;
        configure(&f.store, "stripe", IntegrationMode::Disabled).await;
        let mut inactive = IntegrationConfig::new(id("vapi"), IntegrationMode::Byok);
        inactive.is_active = false;
        f.store.upsert_config(&inactive).await.expect("upsert");
        f.broker
            .connect(&tenant(), &id("openai"), api_key("sk-test"))
            .await
            .expect("connect");

        let listing = f.broker.list_integrations(&tenant()).await;
        assert!(listing.success);
        let ids: Vec<_> = listing.integrations.iter().map(|e| e.definition.id.as_str()).collect();
        assert!(ids.contains(&"openai"));
        assert!(!ids.contains(&"stripe"));
        assert!(!ids.contains(&"vapi"));
        assert_eq!(listing.stats.total, listing.integrations.len());
        assert_eq!(listing.stats.connected, 1);
        assert_eq!(listing.categories.len(), Category::ALL.len());

        let json = serde_json::to_value(&*listing).expect("serialize");
        let openai = json["integrations"]
            .as_array()
            .expect("array")
            .iter()
            .find(|e| e["id"] == "openai")
            .expect("openai listed");
        assert_eq!(openai["isConnected"], true);
        assert_eq!(openai["mode"], "BYOK");
        assert!(json["byCategory"]["ai"].as_array().is_some());
    }

    #[tokio::test]
    async fn listing_is_cached_until_a_write() {
        let f = fixture();
        configure(&f.store, "openai", IntegrationMode::Byok).await;

        let before = f.broker.list_integrations(&tenant()).await;
        assert_eq!(before.stats.connected, 0);
        f.broker.list_integrations(&tenant()).await;
        assert_eq!(f.store.snapshot_count(), 1);

        f.broker
            .connect(&tenant(), &id("openai"), api_key("sk-test"))
            .await
            .expect("connect");
        let after = f.broker.list_integrations(&tenant()).await;
        assert_eq!(after.stats.connected, 1);
        assert_eq!(f.store.snapshot_count(), 2);
    }

    #[tokio::test]
    async fn platform_config_write_evicts_every_tenant() {
        let f = fixture();
        configure(&f.store, "openai", IntegrationMode::Byok).await;
        let listing = f.broker.list_integrations(&tenant()).await;
        assert!(listing.integrations.iter().any(|e| e.definition.id == id("openai")));

        f.broker
            .set_platform_config(
                &id("openai"),
                PlatformConfigRequest {
                    mode: IntegrationMode::Disabled,
                    credentials: None,
                    markup_percent: None,
                    is_active: None,
                    setup_instructions: None,
                },
            )
            .await
            .expect("set config");

        let listing = f.broker.list_integrations(&tenant()).await;
        assert!(!listing.integrations.iter().any(|e| e.definition.id == id("openai")));
    }

    #[tokio::test]
    async fn platform_config_masks_and_validates_credentials() {
        let f = fixture();
        let err = f
            .broker
            .set_platform_config(
                &id("stripe"),
                PlatformConfigRequest {
                    mode: IntegrationMode::Included,
                    credentials: Some(CredentialMap::new().with("apiKey", "wrong-field")),
                    markup_percent: None,
                    is_active: None,
                    setup_instructions: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MISSING_CREDENTIALS");

        let view = f
            .broker
            .set_platform_config(
                &id("openai"),
                PlatformConfigRequest {
                    mode: IntegrationMode::Included,
                    credentials: Some(CredentialMap::new().with("apiKey", "sk-platform-0123456789")),
                    markup_percent: Some(20.0),
                    is_active: None,
                    setup_instructions: None,
                },
            )
            .await
            .expect("set config");
        let masked = view.masked_credentials.expect("masked");
        assert_eq!(masked["apiKey"], "sk-p****6789");

        let resolved = f
            .broker
            .resolver()
            .resolve(&id("openai"), &tenant(), None)
            .await
            .expect("resolve");
        assert_eq!(resolved.mode, IntegrationMode::Included);
        assert_eq!(resolved.credentials.get("apiKey"), Some("sk-platform-0123456789"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_snapshot_degrades_and_is_cancelled() {
        let f = fixture_with(
            MemoryStore::new().with_snapshot_delay(Duration::from_secs(60)),
            ValidatorSet::new(reqwest::Client::new()),
            BrokerConfig::default(),
        );

        let listing = f.broker.list_integrations(&tenant()).await;
        assert!(listing.is_degraded());
        assert!(listing.integrations.is_empty());
        assert_eq!(listing.stats, ListingStats::default());
        assert_eq!(listing.retry_after, Some(10));
        assert_eq!(listing.categories, Category::ALL.to_vec());

        for _ in 0..10 {
            if f.store.cancelled_snapshot_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(f.store.cancelled_snapshot_count(), 1);

        let json = serde_json::to_value(&*listing).expect("serialize");
        assert_eq!(json["success"], false);
        assert_eq!(json["stats"]["total"], 0);
        assert_eq!(json["retryAfter"], 10);
    }

    #[tokio::test]
    async fn degraded_listing_is_not_cached() {
        let f = fixture();
        f.store.set_unavailable(true);
        assert!(f.broker.list_integrations(&tenant()).await.is_degraded());
        f.store.set_unavailable(false);
        assert!(!f.broker.list_integrations(&tenant()).await.is_degraded());
    }

    #[tokio::test]
    async fn health_check_buckets_each_connection() {
        let mut validators = ValidatorSet::new(reqwest::Client::new());
        validators.insert(id("filevine"), Arc::new(GenericOAuthValidator));
        validators.insert(id("google"), Arc::new(GenericOAuthValidator));
        let f = fixture_with(MemoryStore::new(), validators, BrokerConfig::default());

        let mut healthy = Connection::new(tenant(), id("filevine"), "fv");
        healthy.access_token_encrypted = Some(f.vault.encrypt_secret("at").expect("encrypt"));
        healthy.token_expires_at = Some(Utc::now() + chrono::Duration::hours(1));

        let mut expired = Connection::new(tenant(), id("google"), "g");
        expired.access_token_encrypted = Some(f.vault.encrypt_secret("at").expect("encrypt"));
        expired.token_expires_at = Some(Utc::now() - chrono::Duration::hours(1));

        let mut broken = Connection::new(tenant(), id("google"), "g2");
        broken.account_email = Some("other@example.com".to_string());

        let mut unchecked = Connection::new(tenant(), id("openai"), "o");
        unchecked.credentials_encrypted = Some(
            f.vault
                .encrypt(&CredentialMap::new().with("apiKey", "sk"))
                .expect("encrypt"),
        );

        for connection in [&healthy, &expired, &broken, &unchecked] {
            f.store.insert_connection(connection).await.expect("insert");
        }

        let report = f.broker.health_check(&tenant()).await.expect("health");
        assert_eq!(
            report.summary,
            HealthSummary {
                total: 4,
                healthy: 1,
                unhealthy: 1,
                expired: 1,
                unchecked: 1,
            }
        );
        let expired_entry = report
            .connections
            .iter()
            .find(|c| c.connection_id == expired.id)
            .expect("listed");
        assert_eq!(expired_entry.status, HealthStatus::Expired);
        assert_eq!(
            expired_entry.validation.as_ref().and_then(|v| v.error_code),
            Some(ValidationErrorCode::TokenExpiredNoRefresh)
        );
    }

    #[tokio::test]
    async fn test_connection_records_status() {
        let mut validators = ValidatorSet::new(reqwest::Client::new());
        validators.insert(id("filevine"), Arc::new(GenericOAuthValidator));
        let f = fixture_with(MemoryStore::new(), validators, BrokerConfig::default());

        let mut connection = Connection::new(tenant(), id("filevine"), "fv");
        connection.access_token_encrypted = Some(f.vault.encrypt_secret("at").expect("encrypt"));
        connection.token_expires_at = Some(Utc::now() - chrono::Duration::minutes(5));
        f.store.insert_connection(&connection).await.expect("insert");

        let result = f
            .broker
            .test_connection(&tenant(), &id("filevine"), connection.id)
            .await
            .expect("test");
        assert!(!result.success);

        let stored = f
            .store
            .find_connection(connection.id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(stored.status, crate::model::ConnectionStatus::Expired);
        assert!(stored.last_error.is_some());

        let err = f
            .broker
            .test_connection(&tenant(), &id("openai"), connection.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONNECTION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_connection_without_validator() {
        let f = fixture();
        configure(&f.store, "openai", IntegrationMode::Byok).await;
        let summary = f
            .broker
            .connect(&tenant(), &id("openai"), api_key("sk-test"))
            .await
            .expect("connect");
        let err = f
            .broker
            .test_connection(&tenant(), &id("openai"), summary.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NO_VALIDATOR");
    }

    #[tokio::test]
    async fn disconnect_soft_deletes() {
        let f = fixture();
        configure(&f.store, "openai", IntegrationMode::Byok).await;
        let summary = f
            .broker
            .connect(&tenant(), &id("openai"), api_key("sk-test"))
            .await
            .expect("connect");

        f.broker
            .disconnect(&tenant(), &id("openai"), summary.id)
            .await
            .expect("disconnect");
        let stored = f
            .store
            .find_connection(summary.id)
            .await
            .expect("find")
            .expect("row kept");
        assert!(!stored.is_active);

        let err = f
            .broker
            .resolver()
            .resolve(&id("openai"), &tenant(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NO_CONNECTION");

        let other = TenantId::parse("t2").expect("valid tenant");
        let err = f
            .broker
            .disconnect(&other, &id("openai"), summary.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONNECTION_NOT_FOUND");
    }

    #[tokio::test]
    async fn update_merges_credentials() {
        let f = fixture();
        configure(&f.store, "nylas", IntegrationMode::Byok).await;
        let summary = f
            .broker
            .connect(
                &tenant(),
                &id("nylas"),
                ConnectRequest {
                    credentials: CredentialMap::new()
                        .with("apiKey", "nyk-old")
                        .with("grantId", "g-1"),
                    ..ConnectRequest::default()
                },
            )
            .await
            .expect("connect");

        let updated = f
            .broker
            .update_connection(
                &tenant(),
                &id("nylas"),
                summary.id,
                UpdateConnectionRequest {
                    name: Some("Primary inbox".to_string()),
                    credentials: Some(CredentialMap::new().with("apiKey", "nyk-new")),
                },
            )
            .await
            .expect("update");
        assert_eq!(updated.name, "Primary inbox");

        let resolved = f
            .broker
            .resolver()
            .resolve(&id("nylas"), &tenant(), None)
            .await
            .expect("resolve");
        assert_eq!(resolved.credentials.get("apiKey"), Some("nyk-new"));
        assert_eq!(resolved.credentials.get("grantId"), Some("g-1"));

        let err = f
            .broker
            .update_connection(
                &tenant(),
                &id("nylas"),
                summary.id,
                UpdateConnectionRequest {
                    name: None,
                    credentials: Some(CredentialMap::new().with("grantId", "")),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MISSING_CREDENTIALS");
    }

    fn oauth_fixture(token_url: String) -> Fixture {
        let mut refresher = TokenRefresher::new().expect("refresher");
        refresher
            .register(
                id("msgraph"),
                OAuthClientConfig {
                    client_id: "client".to_string(),
                    client_secret: "secret".to_string(),
                    token_url,
                },
            )
            .expect("register");
        let mut f = fixture();
        f.broker = ConnectionBroker::new(
            Arc::new(Catalog::builtin()),
            f.store.clone(),
            f.vault.clone(),
            Arc::new(ValidatorSet::new(reqwest::Client::new())),
            BrokerConfig::default(),
        )
        .with_refresher(Arc::new(refresher));
        f
    }

    #[tokio::test]
    async fn refresh_rotates_tokens() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_includes("refresh_token=rt-old");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "access_token": "at-new",
                    "token_type": "bearer",
                    "expires_in": 3600,
                    "refresh_token": "rt-new"
                }));
        });
        let f = oauth_fixture(server.url("/token"));

        let mut connection = Connection::new(tenant(), id("msgraph"), "m");
        connection.access_token_encrypted = Some(f.vault.encrypt_secret("at-old").expect("encrypt"));
        connection.refresh_token_encrypted = Some(f.vault.encrypt_secret("rt-old").expect("encrypt"));
        connection.token_expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        connection.mark_expired("expired");
        f.store.insert_connection(&connection).await.expect("insert");

        let summary = f
            .broker
            .refresh_connection(&tenant(), &id("msgraph"), connection.id)
            .await
            .expect("refresh");
        mock.assert();
        assert_eq!(summary.status, crate::model::ConnectionStatus::Active);

        let stored = f
            .store
            .find_connection(connection.id)
            .await
            .expect("find")
            .expect("exists");
        let material = f.broker.resolver().decrypt_connection(&stored).expect("decrypt");
        assert_eq!(material.access_token(), Some("at-new"));
        assert_eq!(material.refresh_token(), Some("rt-new"));
        assert!(!material.is_expired());
    }

    #[tokio::test]
    async fn refresh_requires_client_and_token() {
        let server = MockServer::start();
        let f = oauth_fixture(server.url("/token"));

        let connection = Connection::new(tenant(), id("msgraph"), "m");
        f.store.insert_connection(&connection).await.expect("insert");
        let err = f
            .broker
            .refresh_connection(&tenant(), &id("msgraph"), connection.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TOKEN_EXPIRED_NO_REFRESH");

        let teams = Connection::new(tenant(), id("teams"), "t");
        f.store.insert_connection(&teams).await.expect("insert");
        let err = f
            .broker
            .refresh_connection(&tenant(), &id("teams"), teams.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "OAUTH_NOT_CONFIGURED");
    }

    #[tokio::test]
    async fn rejected_refresh_marks_expired() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(400)
                .header("content-type", "application/json")
                .json_body(json!({"error": "invalid_grant"}));
        });
        let f = oauth_fixture(server.url("/token"));

        let mut connection = Connection::new(tenant(), id("msgraph"), "m");
        connection.refresh_token_encrypted = Some(f.vault.encrypt_secret("rt").expect("encrypt"));
        f.store.insert_connection(&connection).await.expect("insert");

        let err = f
            .broker
            .refresh_connection(&tenant(), &id("msgraph"), connection.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TOKEN_REFRESH_FAILED");
        let stored = f
            .store
            .find_connection(connection.id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(stored.status, crate::model::ConnectionStatus::Expired);
    }
}
