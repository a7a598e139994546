//! Credential resolution: INCLUDED platform credentials or BYOK tenant
//! connections.

use crate::credential::{
    ACCESS_TOKEN_FIELD, CredentialMap, CredentialMaterial, REFRESH_TOKEN_FIELD, ResolvedCredentials,
};
use crate::error::CredentialError;
use crate::model::{Connection, IntegrationConfig, IntegrationMode};
use crate::store::IntegrationStore;
use crate::vault::CredentialVault;
use chrono::Utc;
use easemail_core::{IntegrationId, TenantId};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Resolves which credentials a tenant's call to an integration should use.
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn IntegrationStore>,
    vault: Arc<CredentialVault>,
}

impl CredentialResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(store: Arc<dyn IntegrationStore>, vault: Arc<CredentialVault>) -> Self {
        Self { store, vault }
    }

    /// Returns the mode resolution would apply for an integration.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` when no platform config exists.
    pub async fn effective_mode(
        &self,
        integration_id: &IntegrationId,
    ) -> Result<IntegrationMode, CredentialError> {
        Ok(self.load_config(integration_id).await?.effective_mode())
    }

    /// Resolves credentials for `tenant_id` calling `integration_id`.
    ///
    /// With `account_email`, BYOK resolution only considers connections
    /// bound to that account. A successful BYOK resolution records
    /// `last_used_at` in the background; failure to record it is logged and
    /// does not affect the result.
    ///
    /// # Errors
    ///
    /// Returns a [`CredentialError`] whose `code()` names the failure.
    #[instrument(skip_all, fields(integration_id = %integration_id, tenant_id = %tenant_id))]
    pub async fn resolve(
        &self,
        integration_id: &IntegrationId,
        tenant_id: &TenantId,
        account_email: Option<&str>,
    ) -> Result<ResolvedCredentials, CredentialError> {
        let config = self.load_config(integration_id).await?;

        match config.effective_mode() {
            IntegrationMode::Disabled => Err(CredentialError::Disabled {
                integration_id: integration_id.clone(),
            }),
            IntegrationMode::Included => {
                let blob = config.credentials_encrypted.as_deref().ok_or_else(|| {
                    CredentialError::NoCredentials {
                        integration_id: integration_id.clone(),
                    }
                })?;
                let credentials = self.vault.decrypt(blob).map_err(|e| {
                    CredentialError::DecryptionFailed {
                        details: e.to_string(),
                    }
                })?;
                debug!("resolved platform credentials");
                Ok(ResolvedCredentials::included(credentials))
            }
            IntegrationMode::Byok => {
                let connections = self
                    .store
                    .list_active_connections(tenant_id, Some(integration_id))
                    .await
                    .map_err(|e| CredentialError::StoreUnavailable {
                        details: e.to_string(),
                    })?;
                let candidates = connections.into_iter().filter(|c| {
                    account_email.is_none_or(|email| c.account_email.as_deref() == Some(email))
                });
                let connection = select_most_recent(candidates).ok_or_else(|| {
                    CredentialError::NoConnection {
                        integration_id: integration_id.clone(),
                        tenant_id: tenant_id.clone(),
                    }
                })?;
                if !connection.has_credentials() {
                    return Err(CredentialError::NoCredentials {
                        integration_id: integration_id.clone(),
                    });
                }

                let material = self.decrypt_connection(&connection)?;
                self.touch_in_background(&connection);
                debug!(connection_id = %connection.id, "resolved tenant connection");
                Ok(ResolvedCredentials::byok(
                    material.credentials,
                    connection.id,
                    connection.account_email,
                ))
            }
        }
    }

    /// Decrypts a connection's credential fields and OAuth tokens into one
    /// map.
    ///
    /// # Errors
    ///
    /// Returns `DecryptionFailed` if any stored blob cannot be decrypted.
    pub fn decrypt_connection(
        &self,
        connection: &Connection,
    ) -> Result<CredentialMaterial, CredentialError> {
        let decryption_failed = |e: rootcause::prelude::Report<crate::error::VaultError>| {
            CredentialError::DecryptionFailed {
                details: e.to_string(),
            }
        };

        let mut credentials = match connection.credentials_encrypted.as_deref() {
            Some(blob) => self.vault.decrypt(blob).map_err(decryption_failed)?,
            None => CredentialMap::new(),
        };
        if let Some(blob) = connection.access_token_encrypted.as_deref() {
            let token = self.vault.decrypt_secret(blob).map_err(decryption_failed)?;
            credentials.insert(ACCESS_TOKEN_FIELD, token);
        }
        if let Some(blob) = connection.refresh_token_encrypted.as_deref() {
            let token = self.vault.decrypt_secret(blob).map_err(decryption_failed)?;
            credentials.insert(REFRESH_TOKEN_FIELD, token);
        }

        Ok(CredentialMaterial::new(credentials).with_token_expiry(connection.token_expires_at))
    }

    async fn load_config(
        &self,
        integration_id: &IntegrationId,
    ) -> Result<IntegrationConfig, CredentialError> {
        self.store
            .find_config(integration_id)
            .await
            .map_err(|e| CredentialError::StoreUnavailable {
                details: e.to_string(),
            })?
            .ok_or_else(|| CredentialError::NotConfigured {
                integration_id: integration_id.clone(),
            })
    }

    fn touch_in_background(&self, connection: &Connection) {
        let store = Arc::clone(&self.store);
        let id = connection.id;
        tokio::spawn(async move {
            if let Err(e) = store.touch_last_used(id, Utc::now()).await {
                warn!(connection_id = %id, error = %e, "failed to record connection use");
            }
        });
    }
}

/// Picks the most recently used connection. Never-used connections rank
/// below used ones; ties fall back to the newest.
pub fn select_most_recent(connections: impl IntoIterator<Item = Connection>) -> Option<Connection> {
    connections
        .into_iter()
        .max_by_key(|c| (c.last_used_at, c.created_at))
}
