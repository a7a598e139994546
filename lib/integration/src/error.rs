//! Error types for the integration crate.
//!
//! Expected failure modes are plain enums returned directly so callers
//! branch on `code()`:
//! - `CredentialError`: why a credential resolution failed
//! - `BrokerError`: why a connection management operation was rejected
//! - `DispatchError`: why a tool call could not be dispatched
//!
//! Infrastructure failures are wrapped in `rootcause::Report`:
//! - `StoreError`: datastore reads and writes
//! - `VaultError`: encryption and decryption
//! - `OAuthError`: token endpoint exchanges
//! - `RegistryError`: integration registration and startup
//! - `ToolError`: tool call construction

use easemail_core::{ConnectionId, IntegrationId, TenantId};
use std::fmt;

/// Errors from credential resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No platform configuration row exists for the integration.
    NotConfigured { integration_id: IntegrationId },
    /// The integration is disabled platform-wide.
    Disabled { integration_id: IntegrationId },
    /// BYOK integration and the tenant has no active connection.
    NoConnection {
        integration_id: IntegrationId,
        tenant_id: TenantId,
    },
    /// A config or connection exists but carries no credential material.
    NoCredentials { integration_id: IntegrationId },
    /// The datastore could not be read.
    StoreUnavailable { details: String },
    /// Stored credential material could not be decrypted.
    DecryptionFailed { details: String },
}

impl CredentialError {
    /// Stable machine-readable code for this failure.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConfigured { .. } => "NOT_CONFIGURED",
            Self::Disabled { .. } => "DISABLED",
            Self::NoConnection { .. } => "NO_CONNECTION",
            Self::NoCredentials { .. } => "NO_CREDENTIALS",
            Self::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
            Self::DecryptionFailed { .. } => "DECRYPTION_FAILED",
        }
    }
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured { integration_id } => {
                write!(f, "integration '{integration_id}' is not configured")
            }
            Self::Disabled { integration_id } => {
                write!(f, "integration '{integration_id}' is disabled")
            }
            Self::NoConnection {
                integration_id,
                tenant_id,
            } => {
                write!(
                    f,
                    "tenant '{tenant_id}' has no active connection for '{integration_id}'"
                )
            }
            Self::NoCredentials { integration_id } => {
                write!(f, "no credentials stored for '{integration_id}'")
            }
            Self::StoreUnavailable { details } => {
                write!(f, "credential store unavailable: {details}")
            }
            Self::DecryptionFailed { details } => {
                write!(f, "failed to decrypt credentials: {details}")
            }
        }
    }
}

impl std::error::Error for CredentialError {}

/// Errors from the integration datastore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A query failed.
    QueryFailed { details: String },
    /// A row could not be decoded into a domain value.
    InvalidRow { details: String },
    /// The caller cancelled the operation.
    Cancelled,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueryFailed { details } => write!(f, "query failed: {details}"),
            Self::InvalidRow { details } => write!(f, "invalid row: {details}"),
            Self::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from the credential vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// The master key is malformed.
    InvalidKey { reason: String },
    /// Encryption failed.
    EncryptionFailed { reason: String },
    /// Decryption failed.
    DecryptionFailed { reason: String },
    /// The blob is not in a recognised format.
    InvalidFormat { reason: String },
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey { reason } => write!(f, "invalid vault key: {reason}"),
            Self::EncryptionFailed { reason } => write!(f, "encryption failed: {reason}"),
            Self::DecryptionFailed { reason } => write!(f, "decryption failed: {reason}"),
            Self::InvalidFormat { reason } => {
                write!(f, "invalid credential blob: {reason}")
            }
        }
    }
}

impl std::error::Error for VaultError {}

/// Errors from OAuth token refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthError {
    /// No OAuth client is configured for the integration.
    NotConfigured { integration_id: IntegrationId },
    /// The OAuth client configuration is invalid.
    Configuration { reason: String },
    /// The token endpoint rejected the exchange.
    TokenExchange { reason: String },
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured { integration_id } => {
                write!(f, "no OAuth client configured for '{integration_id}'")
            }
            Self::Configuration { reason } => write!(f, "OAuth configuration error: {reason}"),
            Self::TokenExchange { reason } => write!(f, "token exchange failed: {reason}"),
        }
    }
}

impl std::error::Error for OAuthError {}

/// Errors from the integration registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two integrations were registered under the same id.
    DuplicateIntegration { integration_id: IntegrationId },
    /// Two integrations expose a tool with the same name.
    DuplicateTool {
        tool: String,
        integration_id: IntegrationId,
    },
    /// An integration failed to initialize.
    InitializationFailed {
        integration_id: IntegrationId,
        reason: String,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateIntegration { integration_id } => {
                write!(f, "integration '{integration_id}' is already registered")
            }
            Self::DuplicateTool {
                tool,
                integration_id,
            } => {
                write!(
                    f,
                    "tool '{tool}' from '{integration_id}' collides with an existing tool"
                )
            }
            Self::InitializationFailed {
                integration_id,
                reason,
            } => {
                write!(f, "integration '{integration_id}' failed to initialize: {reason}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors building or sending a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// The integration does not expose the tool.
    UnknownTool { tool: String },
    /// Call parameters are invalid.
    InvalidParameters { tool: String, reason: String },
    /// A credential field the auth scheme needs is absent.
    MissingCredential { field: String },
    /// The request URL could not be built.
    InvalidUrl { reason: String },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTool { tool } => write!(f, "unknown tool '{tool}'"),
            Self::InvalidParameters { tool, reason } => {
                write!(f, "invalid parameters for '{tool}': {reason}")
            }
            Self::MissingCredential { field } => {
                write!(f, "credential field '{field}' is missing")
            }
            Self::InvalidUrl { reason } => write!(f, "invalid request url: {reason}"),
        }
    }
}

impl std::error::Error for ToolError {}

/// Errors from tool dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No configured integration exposes the tool.
    UnknownTool { tool: String },
    /// Credentials could not be resolved.
    Credentials(CredentialError),
    /// The call could not be built from the parameters and credentials.
    InvalidCall { details: String },
}

impl DispatchError {
    /// Stable machine-readable code for this failure.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownTool { .. } => "UNKNOWN_TOOL",
            Self::Credentials(e) => e.code(),
            Self::InvalidCall { .. } => "INVALID_TOOL_CALL",
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTool { tool } => write!(f, "unknown tool '{tool}'"),
            Self::Credentials(e) => write!(f, "{e}"),
            Self::InvalidCall { details } => write!(f, "invalid tool call: {details}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<CredentialError> for DispatchError {
    fn from(e: CredentialError) -> Self {
        Self::Credentials(e)
    }
}

/// Errors from connection broker operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The integration id is not in the catalog.
    UnknownIntegration { integration_id: IntegrationId },
    /// Tenant connections are only accepted in BYOK mode.
    ModeNotByok {
        integration_id: IntegrationId,
        mode: String,
    },
    /// Required credential fields are absent or blank.
    MissingCredentials { fields: Vec<String> },
    /// No active connection with this id belongs to the tenant and integration.
    ConnectionNotFound { connection_id: ConnectionId },
    /// The integration has no live validator.
    NoValidator { integration_id: IntegrationId },
    /// No OAuth client is configured for refreshing this integration's tokens.
    OAuthNotConfigured { integration_id: IntegrationId },
    /// The connection has no refresh token.
    NoRefreshToken { connection_id: ConnectionId },
    /// The token endpoint rejected the refresh.
    RefreshFailed { details: String },
    /// The datastore failed.
    Storage { details: String },
    /// The vault failed.
    Vault { details: String },
}

impl BrokerError {
    /// Stable machine-readable code for this failure.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownIntegration { .. } => "UNKNOWN_INTEGRATION",
            Self::ModeNotByok { .. } => "MODE_NOT_BYOK",
            Self::MissingCredentials { .. } => "MISSING_CREDENTIALS",
            Self::ConnectionNotFound { .. } => "CONNECTION_NOT_FOUND",
            Self::NoValidator { .. } => "NO_VALIDATOR",
            Self::OAuthNotConfigured { .. } => "OAUTH_NOT_CONFIGURED",
            Self::NoRefreshToken { .. } => "TOKEN_EXPIRED_NO_REFRESH",
            Self::RefreshFailed { .. } => "TOKEN_REFRESH_FAILED",
            Self::Storage { .. } | Self::Vault { .. } => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownIntegration { integration_id } => {
                write!(f, "unknown integration '{integration_id}'")
            }
            Self::ModeNotByok {
                integration_id,
                mode,
            } => {
                write!(
                    f,
                    "integration '{integration_id}' is in {mode} mode and does not accept tenant connections"
                )
            }
            Self::MissingCredentials { fields } => {
                write!(f, "missing required credentials: {}", fields.join(", "))
            }
            Self::ConnectionNotFound { connection_id } => {
                write!(f, "connection '{connection_id}' not found")
            }
            Self::NoValidator { integration_id } => {
                write!(f, "integration '{integration_id}' cannot be validated")
            }
            Self::OAuthNotConfigured { integration_id } => {
                write!(f, "token refresh is not configured for '{integration_id}'")
            }
            Self::NoRefreshToken { connection_id } => {
                write!(f, "connection '{connection_id}' has no refresh token")
            }
            Self::RefreshFailed { details } => write!(f, "token refresh failed: {details}"),
            Self::Storage { details } => write!(f, "storage error: {details}"),
            Self::Vault { details } => write!(f, "vault error: {details}"),
        }
    }
}

impl std::error::Error for BrokerError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn integration(id: &str) -> IntegrationId {
        IntegrationId::parse(id).expect("valid id")
    }

    #[test]
    fn credential_error_codes_are_stable() {
        let id = integration("stripe");
        assert_eq!(
            CredentialError::NotConfigured {
                integration_id: id.clone()
            }
            .code(),
            "NOT_CONFIGURED"
        );
        assert_eq!(
            CredentialError::Disabled {
                integration_id: id.clone()
            }
            .code(),
            "DISABLED"
        );
        assert_eq!(
            CredentialError::NoConnection {
                integration_id: id.clone(),
                tenant_id: TenantId::parse("t1").expect("valid tenant"),
            }
            .code(),
            "NO_CONNECTION"
        );
        assert_eq!(
            CredentialError::NoCredentials { integration_id: id }.code(),
            "NO_CREDENTIALS"
        );
    }

    #[test]
    fn credential_error_display_names_tenant() {
        let err = CredentialError::NoConnection {
            integration_id: integration("openai"),
            tenant_id: TenantId::parse("t1").expect("valid tenant"),
        };
        let text = err.to_string();
        assert!(text.contains("t1"));
        assert!(text.contains("openai"));
    }

    #[test]
    fn broker_infrastructure_errors_surface_as_unknown() {
        let err = BrokerError::Storage {
            details: "connection reset".to_string(),
        };
        assert_eq!(err.code(), "UNKNOWN_ERROR");
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn missing_credentials_lists_fields() {
        let err = BrokerError::MissingCredentials {
            fields: vec!["apiKey".to_string(), "baseId".to_string()],
        };
        assert_eq!(err.code(), "MISSING_CREDENTIALS");
        assert!(err.to_string().contains("apiKey, baseId"));
    }
}
