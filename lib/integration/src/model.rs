//! Persistent records: platform integration configs and tenant connections.

use chrono::{DateTime, Utc};
use easemail_core::{ConnectionId, IntegrationId, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How an integration's credentials are sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrationMode {
    /// The platform supplies credentials shared by all tenants.
    Included,
    /// Each tenant brings its own credentials.
    Byok,
    /// The integration is unavailable.
    Disabled,
}

impl IntegrationMode {
    /// Returns the storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Included => "INCLUDED",
            Self::Byok => "BYOK",
            Self::Disabled => "DISABLED",
        }
    }

    /// Parses the storage representation. Unknown values read as disabled.
    #[must_use]
    pub fn from_str_value(s: &str) -> Self {
        match s {
            "INCLUDED" => Self::Included,
            "BYOK" => Self::Byok,
            _ => Self::Disabled,
        }
    }
}

impl fmt::Display for IntegrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform-level settings for one integration.
#[derive(Debug, Clone)]
pub struct IntegrationConfig {
    /// The integration this row configures.
    pub integration_id: IntegrationId,
    /// Configured credential mode.
    pub mode: IntegrationMode,
    /// Vault blob of the platform credentials (INCLUDED mode only).
    pub credentials_encrypted: Option<String>,
    /// Usage markup applied when billing INCLUDED usage, in percent.
    pub markup_percent: f64,
    /// Inactive configs behave as disabled.
    pub is_active: bool,
    /// Free-form setup notes shown to tenants.
    pub setup_instructions: Option<String>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl IntegrationConfig {
    /// Creates an active config with no credentials.
    #[must_use]
    pub fn new(integration_id: IntegrationId, mode: IntegrationMode) -> Self {
        Self {
            integration_id,
            mode,
            credentials_encrypted: None,
            markup_percent: 0.0,
            is_active: true,
            setup_instructions: None,
            updated_at: Utc::now(),
        }
    }

    /// Sets the encrypted platform credentials.
    #[must_use]
    pub fn with_credentials(mut self, encrypted: impl Into<String>) -> Self {
        self.credentials_encrypted = Some(encrypted.into());
        self
    }

    /// The mode resolution actually applies: inactive rows are disabled.
    #[must_use]
    pub fn effective_mode(&self) -> IntegrationMode {
        if self.is_active {
            self.mode
        } else {
            IntegrationMode::Disabled
        }
    }
}

/// Health of a tenant connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Credentials were last seen working.
    Active,
    /// The OAuth token expired.
    Expired,
    /// The last validation or use failed.
    Error,
    /// Awaiting OAuth completion or first validation.
    Pending,
}

impl ConnectionStatus {
    /// Returns the storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Error => "error",
            Self::Pending => "pending",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn from_str_value(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "expired" => Self::Expired,
            "error" => Self::Error,
            _ => Self::Pending,
        }
    }
}

/// A tenant's stored credentials for one integration.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Connection ID.
    pub id: ConnectionId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Integration the connection is for.
    pub integration_id: IntegrationId,
    /// User-provided label.
    pub name: String,
    /// Vendor account the credentials belong to, when known.
    pub account_email: Option<String>,
    /// Vault blob of the credential fields.
    pub credentials_encrypted: Option<String>,
    /// Vault blob of the OAuth access token.
    pub access_token_encrypted: Option<String>,
    /// Vault blob of the OAuth refresh token.
    pub refresh_token_encrypted: Option<String>,
    /// When the access token expires.
    pub token_expires_at: Option<DateTime<Utc>>,
    /// Current status.
    pub status: ConnectionStatus,
    /// Last error message, set alongside `Error` or `Expired`.
    pub last_error: Option<String>,
    /// When credentials were last resolved for use.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Soft-delete flag.
    pub is_active: bool,
    /// When the connection was created.
    pub created_at: DateTime<Utc>,
    /// When the connection was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    /// Creates a new active connection without credential material.
    #[must_use]
    pub fn new(tenant_id: TenantId, integration_id: IntegrationId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConnectionId::new(),
            tenant_id,
            integration_id,
            name: name.into(),
            account_email: None,
            credentials_encrypted: None,
            access_token_encrypted: None,
            refresh_token_encrypted: None,
            token_expires_at: None,
            status: ConnectionStatus::Active,
            last_error: None,
            last_used_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// True if either credential fields or an OAuth access token are stored.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.credentials_encrypted.is_some() || self.access_token_encrypted.is_some()
    }

    /// True if this connection belongs to `tenant_id` and `integration_id`
    /// and has not been soft-deleted.
    #[must_use]
    pub fn is_owned_by(&self, tenant_id: &TenantId, integration_id: &IntegrationId) -> bool {
        self.is_active && &self.tenant_id == tenant_id && &self.integration_id == integration_id
    }

    /// Sets the status to active.
    pub fn mark_active(&mut self) {
        self.status = ConnectionStatus::Active;
        self.last_error = None;
        self.updated_at = Utc::now();
    }

    /// Sets the status to expired.
    pub fn mark_expired(&mut self, message: impl Into<String>) {
        self.status = ConnectionStatus::Expired;
        self.last_error = Some(message.into());
        self.updated_at = Utc::now();
    }

    /// Sets the status to error.
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = ConnectionStatus::Error;
        self.last_error = Some(message.into());
        self.updated_at = Utc::now();
    }

    /// Soft-deletes the connection.
    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }

    /// Returns the display view, which never carries credential material.
    #[must_use]
    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            id: self.id,
            integration_id: self.integration_id.clone(),
            name: self.name.clone(),
            account_email: self.account_email.clone(),
            status: self.status,
            last_error: self.last_error.clone(),
            last_used_at: self.last_used_at,
            token_expires_at: self.token_expires_at,
            has_refresh_token: self.refresh_token_encrypted.is_some(),
            created_at: self.created_at,
        }
    }
}

/// Display view of a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub integration_id: IntegrationId,
    pub name: String,
    pub account_email: Option<String>,
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
    pub created_at: DateTime<Utc>,
}
