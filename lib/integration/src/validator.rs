//! Live credential validation.
//!
//! Every integration family has one [`Validator`]. The [`ValidatorSet`]
//! checks required fields before any network call and turns a panicking
//! validator into an `UNKNOWN_ERROR` result, so callers always receive a
//! [`ValidationResult`].

use crate::catalog::Catalog;
use crate::credential::{ACCESS_TOKEN_FIELD, CredentialMaterial};
use crate::probe;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use easemail_core::IntegrationId;
use futures::FutureExt as _;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

/// Why a validation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationErrorCode {
    MissingCredentials,
    InvalidCredentials,
    TokenExpired,
    TokenExpiredNoRefresh,
    ApiError,
    ConnectionError,
    InvalidKeyFormat,
    UnknownError,
}

impl ValidationErrorCode {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "MISSING_CREDENTIALS",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenExpiredNoRefresh => "TOKEN_EXPIRED_NO_REFRESH",
            Self::ApiError => "API_ERROR",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::InvalidKeyFormat => "INVALID_KEY_FORMAT",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// True for the two expiry codes.
    #[must_use]
    pub fn is_expiry(&self) -> bool {
        matches!(self, Self::TokenExpired | Self::TokenExpiredNoRefresh)
    }
}

impl fmt::Display for ValidationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Structured facts a validator learned about the credential.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_info: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

/// Normalized outcome of a live credential check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub success: bool,
    pub message: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ValidationDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ValidationErrorCode>,
}

impl ValidationResult {
    /// A successful check.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            latency_ms: 0,
            details: None,
            error_code: None,
        }
    }

    /// A failed check.
    #[must_use]
    pub fn failure(code: ValidationErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            latency_ms: 0,
            details: None,
            error_code: Some(code),
        }
    }

    #[must_use]
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: ValidationDetails) -> Self {
        self.details = Some(details);
        self
    }
}

/// A live check for one integration family.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Fields that must be present and non-blank before any request.
    fn required_fields(&self) -> Vec<&'static str>;

    /// Performs the check. Must not return early with a panic or error:
    /// every failure is a [`ValidationResult`].
    async fn check(&self, client: &reqwest::Client, material: &CredentialMaterial) -> ValidationResult;
}

/// Validates purely by token expiry, for OAuth vendors without a bespoke
/// probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericOAuthValidator;

#[async_trait]
impl Validator for GenericOAuthValidator {
    fn required_fields(&self) -> Vec<&'static str> {
        vec![ACCESS_TOKEN_FIELD]
    }

    async fn check(&self, _client: &reqwest::Client, material: &CredentialMaterial) -> ValidationResult {
        let details = ValidationDetails {
            token_expires_at: material.token_expires_at,
            ..ValidationDetails::default()
        };
        if !material.is_expired() {
            return ValidationResult::ok("Access token is valid").with_details(details);
        }
        let result = if material.refresh_token().is_some() {
            ValidationResult::failure(
                ValidationErrorCode::TokenExpired,
                "Access token has expired and must be refreshed",
            )
        } else {
            ValidationResult::failure(
                ValidationErrorCode::TokenExpiredNoRefresh,
                "Access token has expired and no refresh token is stored; reconnect required",
            )
        };
        result.with_details(details)
    }
}

/// Map from integration id to its validator.
#[derive(Clone)]
pub struct ValidatorSet {
    validators: HashMap<IntegrationId, Arc<dyn Validator>>,
    client: reqwest::Client,
}

impl ValidatorSet {
    /// Creates an empty set that sends probes through `client`.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            validators: HashMap::new(),
            client,
        }
    }

    /// The validators for every built-in catalog entry.
    #[must_use]
    pub fn builtin(catalog: &Catalog, client: reqwest::Client) -> Self {
        let mut set = Self::new(client);
        for definition in catalog.iter() {
            if let Some(validator) = probe::builtin_validator(definition) {
                set.insert(definition.id.clone(), validator);
            }
        }
        set
    }

    /// Adds or replaces a validator.
    pub fn insert(&mut self, integration_id: IntegrationId, validator: Arc<dyn Validator>) {
        self.validators.insert(integration_id, validator);
    }

    /// True if the integration can be validated.
    #[must_use]
    pub fn has_validator(&self, integration_id: &IntegrationId) -> bool {
        self.validators.contains_key(integration_id)
    }

    /// Validates credential material. Returns `None` when the integration
    /// has no validator.
    pub async fn validate(
        &self,
        integration_id: &IntegrationId,
        material: &CredentialMaterial,
    ) -> Option<ValidationResult> {
        let validator = self.validators.get(integration_id)?;

        let missing = material
            .credentials
            .missing(validator.required_fields().iter().copied());
        if !missing.is_empty() {
            debug!(integration_id = %integration_id, ?missing, "validation skipped: missing fields");
            return Some(ValidationResult::failure(
                ValidationErrorCode::MissingCredentials,
                format!("Missing required credentials: {}", missing.join(", ")),
            ));
        }

        let result = AssertUnwindSafe(validator.check(&self.client, material))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(integration_id = %integration_id, "validator panicked");
                ValidationResult::failure(
                    ValidationErrorCode::UnknownError,
                    "Validator failed unexpectedly",
                )
            });
        Some(result)
    }
}
