//! HTTP error responses.
//!
//! Every failure is returned as `{success: false, error, errorCode}`.
//! Infrastructure failures are logged and surfaced as `UNKNOWN_ERROR`
//! without their details.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use easemail_core::ParseIdError;
use easemail_integration::{BrokerError, CredentialError, DispatchError};
use serde_json::json;

const INTERNAL_MESSAGE: &str = "Internal server error";

/// Errors returned by route handlers.
#[derive(Debug)]
pub enum ApiError {
    Credential(CredentialError),
    Broker(BrokerError),
    Dispatch(DispatchError),
    /// A path or body value failed to parse.
    InvalidRequest { details: String },
}

impl ApiError {
    /// Maps the error to a status, a stable code and a client-safe message.
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            Self::Credential(e) => credential_parts(e),
            Self::Broker(e) => {
                let status = match e {
                    BrokerError::UnknownIntegration { .. } | BrokerError::ConnectionNotFound { .. } => {
                        StatusCode::NOT_FOUND
                    }
                    BrokerError::ModeNotByok { .. } => StatusCode::CONFLICT,
                    BrokerError::Storage { .. } | BrokerError::Vault { .. } => {
                        return internal(e);
                    }
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, e.code(), e.to_string())
            }
            Self::Dispatch(DispatchError::Credentials(e)) => credential_parts(e),
            Self::Dispatch(e @ DispatchError::UnknownTool { .. }) => {
                (StatusCode::NOT_FOUND, e.code(), e.to_string())
            }
            Self::Dispatch(e) => (StatusCode::BAD_REQUEST, e.code(), e.to_string()),
            Self::InvalidRequest { details } => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST", details.clone())
            }
        }
    }
}

fn credential_parts(e: &CredentialError) -> (StatusCode, &'static str, String) {
    let status = match e {
        CredentialError::NotConfigured { .. } => StatusCode::NOT_FOUND,
        CredentialError::Disabled { .. } => StatusCode::FORBIDDEN,
        CredentialError::NoConnection { .. } | CredentialError::NoCredentials { .. } => {
            StatusCode::BAD_REQUEST
        }
        CredentialError::StoreUnavailable { .. } | CredentialError::DecryptionFailed { .. } => {
            return internal(e);
        }
    };
    (status, e.code(), e.to_string())
}

fn internal(e: &dyn std::fmt::Display) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "UNKNOWN_ERROR",
        INTERNAL_MESSAGE.to_string(),
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = json!({
            "success": false,
            "error": message,
            "errorCode": code,
        });
        (status, Json(body)).into_response()
    }
}

impl From<CredentialError> for ApiError {
    fn from(e: CredentialError) -> Self {
        Self::Credential(e)
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        Self::Broker(e)
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        Self::Dispatch(e)
    }
}

impl From<ParseIdError> for ApiError {
    fn from(e: ParseIdError) -> Self {
        Self::InvalidRequest {
            details: e.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest {
            details: rejection.body_text(),
        }
    }
}
