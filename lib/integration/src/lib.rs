//! Credential resolution and connection health for EaseMail integrations.
//!
//! This crate provides:
//!
//! - **Catalog**: the static set of supported vendors, their credential
//!   fields, auth schemes and REST tools
//! - **Credential vault**: AES-256-GCM encryption of stored credentials
//! - **Resolver**: INCLUDED platform credentials or BYOK tenant connections
//! - **Validators**: live per-vendor credential checks
//! - **Registry**: integrations and their callable tools, plus dispatch
//! - **Broker**: tenant listing, health checks and connection management

pub mod auth;
pub mod broker;
pub mod cache;
pub mod catalog;
pub mod connector;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod memory_store;
pub mod model;
pub mod oauth;
pub mod probe;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod validator;
pub mod vault;

pub use broker::{
    BrokerConfig, ConnectRequest, ConnectionBroker, HealthReport, IntegrationListing,
    IntegrationStatus, PlatformConfigRequest, PlatformConfigView, UpdateConnectionRequest,
};
pub use catalog::{Catalog, Category, IntegrationDefinition};
pub use connector::RestIntegration;
pub use credential::{CredentialMap, CredentialMaterial, ResolvedCredentials};
pub use dispatch::ToolDispatcher;
pub use error::{BrokerError, CredentialError, DispatchError, StoreError};
pub use memory_store::MemoryStore;
pub use model::{Connection, ConnectionStatus, ConnectionSummary, IntegrationConfig, IntegrationMode};
pub use oauth::{OAuthClientConfig, TokenRefresher};
pub use registry::{Integration, IntegrationRegistry, ToolDefinition, ToolResult};
pub use resolver::CredentialResolver;
pub use store::{IntegrationStore, TenantSnapshot};
pub use validator::{ValidationErrorCode, ValidationResult, Validator, ValidatorSet};
pub use vault::CredentialVault;
