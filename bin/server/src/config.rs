//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables, with `__`
//! separating nested keys (`BROKER__CACHE_TTL_SECONDS`,
//! `OAUTH__MSGRAPH__CLIENT_ID`).

use easemail_integration::{BrokerConfig, OAuthClientConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Credential vault configuration.
    pub vault: VaultConfig,

    /// Listing cache and timeout tunables.
    #[serde(default)]
    pub broker: BrokerSettings,

    /// Live validation tunables.
    #[serde(default)]
    pub validator: ValidatorSettings,

    /// OAuth clients keyed by integration id.
    #[serde(default)]
    pub oauth: HashMap<String, OAuthClientSettings>,
}

#[derive(Deserialize)]
pub struct VaultConfig {
    /// Base64 of the 32-byte AES-256 master key.
    pub master_key: String,
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}

/// Broker tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSettings {
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    /// Hard limit on the listing query. Past it the listing degrades.
    #[serde(default = "default_query_timeout_seconds")]
    pub query_timeout_seconds: u64,

    #[serde(default = "default_retry_after_seconds")]
    pub retry_after_seconds: u64,

    #[serde(default = "default_cache_max_tenants")]
    pub cache_max_tenants: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_cache_ttl_seconds() -> u64 {
    10
}

fn default_query_timeout_seconds() -> u64 {
    8
}

fn default_retry_after_seconds() -> u64 {
    10
}

fn default_cache_max_tenants() -> u64 {
    10_000
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_cache_ttl_seconds(),
            query_timeout_seconds: default_query_timeout_seconds(),
            retry_after_seconds: default_retry_after_seconds(),
            cache_max_tenants: default_cache_max_tenants(),
        }
    }
}

impl BrokerSettings {
    #[must_use]
    pub fn to_broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            cache_ttl: Duration::from_secs(self.cache_ttl_seconds),
            query_timeout: Duration::from_secs(self.query_timeout_seconds),
            retry_after_secs: self.retry_after_seconds,
            cache_max_tenants: self.cache_max_tenants,
        }
    }
}

/// Validator tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorSettings {
    /// Timeout of each vendor probe request.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_request_timeout_seconds() -> u64 {
    10
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

/// One OAuth client registration.
#[derive(Clone, Deserialize)]
pub struct OAuthClientSettings {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
}

impl std::fmt::Debug for OAuthClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClientSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_url", &self.token_url)
            .finish()
    }
}

impl From<OAuthClientSettings> for OAuthClientConfig {
    fn from(settings: OAuthClientSettings) -> Self {
        Self {
            client_id: settings.client_id,
            client_secret: settings.client_secret,
            token_url: settings.token_url,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(environment: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}
