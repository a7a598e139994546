//! Tenant connection routes.

use super::{connection, integration, tenant};
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use easemail_integration::{ConnectRequest, UpdateConnectionRequest};
use serde_json::json;
use std::sync::Arc;

/// `GET /connections/{tenant_id}`
///
/// A degraded listing is returned with 503 and a `Retry-After` header.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<Response, ApiError> {
    let tenant_id = tenant(&tenant_id)?;
    let listing = state.broker.list_integrations(&tenant_id).await;
    match listing.retry_after {
        Some(retry_after) if listing.is_degraded() => Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, retry_after.to_string())],
            Json(&*listing),
        )
            .into_response()),
        _ => Ok(Json(&*listing).into_response()),
    }
}

/// `GET /connections/{tenant_id}/health`
pub async fn health(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<Response, ApiError> {
    let tenant_id = tenant(&tenant_id)?;
    let report = state.broker.health_check(&tenant_id).await?;
    Ok(Json(json!({
        "success": true,
        "summary": report.summary,
        "connections": report.connections,
    }))
    .into_response())
}

/// `GET /connections/{tenant_id}/{integration_id}`
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, integration_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let tenant_id = tenant(&tenant_id)?;
    let integration_id = integration(&integration_id)?;
    let status = state
        .broker
        .integration_status(&tenant_id, &integration_id)
        .await?;
    Ok(Json(status).into_response())
}

/// `POST /connections/{tenant_id}/{integration_id}`
pub async fn connect(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, integration_id)): Path<(String, String)>,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let tenant_id = tenant(&tenant_id)?;
    let integration_id = integration(&integration_id)?;
    let connection = state
        .broker
        .connect(&tenant_id, &integration_id, request)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "connection": connection })),
    )
        .into_response())
}

/// `PUT /connections/{tenant_id}/{integration_id}/{connection_id}`
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, integration_id, connection_id)): Path<(String, String, String)>,
    payload: Result<Json<UpdateConnectionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let tenant_id = tenant(&tenant_id)?;
    let integration_id = integration(&integration_id)?;
    let connection_id = connection(&connection_id)?;
    let connection = state
        .broker
        .update_connection(&tenant_id, &integration_id, connection_id, request)
        .await?;
    Ok(Json(json!({ "success": true, "connection": connection })).into_response())
}

/// `DELETE /connections/{tenant_id}/{integration_id}/{connection_id}`
pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, integration_id, connection_id)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let tenant_id = tenant(&tenant_id)?;
    let integration_id = integration(&integration_id)?;
    let connection_id = connection(&connection_id)?;
    state
        .broker
        .disconnect(&tenant_id, &integration_id, connection_id)
        .await?;
    Ok(Json(json!({ "success": true })).into_response())
}

/// `POST /connections/{tenant_id}/{integration_id}/{connection_id}/test`
///
/// A failed validation is still a 200: the result carries the error code.
pub async fn test(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, integration_id, connection_id)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let tenant_id = tenant(&tenant_id)?;
    let integration_id = integration(&integration_id)?;
    let connection_id = connection(&connection_id)?;
    let result = state
        .broker
        .test_connection(&tenant_id, &integration_id, connection_id)
        .await?;
    Ok(Json(result).into_response())
}

/// `POST /connections/{tenant_id}/{integration_id}/{connection_id}/refresh`
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, integration_id, connection_id)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let tenant_id = tenant(&tenant_id)?;
    let integration_id = integration(&integration_id)?;
    let connection_id = connection(&connection_id)?;
    let connection = state
        .broker
        .refresh_connection(&tenant_id, &integration_id, connection_id)
        .await?;
    Ok(Json(json!({ "success": true, "connection": connection })).into_response())
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::*;
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};
    use easemail_core::{IntegrationId, TenantId};
    use easemail_integration::{
        Connection, IntegrationConfig, IntegrationMode, IntegrationStore, MemoryStore,
        ValidatorSet, validator::GenericOAuthValidator,
    };
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    async fn configure(app: &TestApp, id: &'static str, mode: IntegrationMode) {
        app.store
            .upsert_config(&IntegrationConfig::new(IntegrationId::from_static(id), mode))
            .await
            .expect("upsert");
    }

    #[tokio::test]
    async fn byok_connect_flow() {
        let app = app().await;
        configure(&app, "openai", IntegrationMode::Byok).await;

        let response = app.send("GET", "/connections/t1/openai", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["isConnected"], false);

        let response = app
            .send(
                "POST",
                "/connections/t1/openai",
                Some(json!({"credentials": {"apiKey": "sk-test"}})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["connection"]["status"], "active");
        assert!(!body.to_string().contains("sk-test"));

        let response = app.send("GET", "/connections/t1/openai", None).await;
        assert_eq!(json_body(response).await["isConnected"], true);

        let response = app.send("GET", "/connections/t1", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["stats"]["connected"], 1);
    }

    #[tokio::test]
    async fn connect_rejections_carry_error_codes() {
        let app = app().await;
        configure(&app, "openai", IntegrationMode::Included).await;
        configure(&app, "stripe", IntegrationMode::Byok).await;

        let response = app
            .send(
                "POST",
                "/connections/t1/openai",
                Some(json!({"credentials": {"apiKey": "sk-test"}})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["errorCode"], "MODE_NOT_BYOK");

        let response = app
            .send("POST", "/connections/t1/stripe", Some(json!({"credentials": {}})))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["errorCode"], "MISSING_CREDENTIALS");

        let response = app
            .send("POST", "/connections/t1/unknown", Some(json!({"credentials": {}})))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["errorCode"], "UNKNOWN_INTEGRATION");
    }

    #[tokio::test]
    async fn malformed_bodies_use_the_error_envelope() {
        let app = app().await;
        configure(&app, "stripe", IntegrationMode::Byok).await;

        let response = app.send("POST", "/connections/t1/stripe", Some(json!({}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["errorCode"], "INVALID_REQUEST");
        assert!(body["error"].as_str().is_some_and(|e| e.contains("credentials")));

        let response = app.send("POST", "/connections/t1/stripe", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["errorCode"], "INVALID_REQUEST");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_datastore_degrades_to_503() {
        let app = app_with(
            MemoryStore::new().with_snapshot_delay(StdDuration::from_secs(30)),
            ValidatorSet::new(reqwest::Client::new()),
        )
        .await;

        let response = app.send("GET", "/connections/t1", None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok()),
            Some("10")
        );
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["integrations"], json!([]));
        assert_eq!(body["stats"]["total"], 0);
        assert_eq!(body["retryAfter"], 10);
        assert_eq!(body["categories"].as_array().map(Vec::len), Some(9));
    }

    #[tokio::test]
    async fn test_endpoint_records_expiry() {
        let mut validators = ValidatorSet::new(reqwest::Client::new());
        validators.insert(IntegrationId::from_static("filevine"), Arc::new(GenericOAuthValidator));
        let app = app_with(MemoryStore::new(), validators).await;

        let mut connection = Connection::new(
            TenantId::from_static("t1"),
            IntegrationId::from_static("filevine"),
            "Filevine",
        );
        connection.access_token_encrypted =
            Some(app.vault.encrypt_secret("at").expect("encrypt"));
        connection.token_expires_at = Some(Utc::now() - Duration::hours(1));
        app.store.insert_connection(&connection).await.expect("insert");

        let uri = format!("/connections/t1/filevine/{}/test", connection.id);
        let response = app.send("POST", &uri, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["errorCode"], "TOKEN_EXPIRED_NO_REFRESH");

        let response = app.send("GET", "/connections/t1/health", None).await;
        let body = json_body(response).await;
        assert_eq!(body["summary"]["expired"], 1);
        assert_eq!(body["connections"][0]["status"], "expired");
    }

    #[tokio::test]
    async fn update_and_delete_connection() {
        let app = app().await;
        configure(&app, "openai", IntegrationMode::Byok).await;
        let response = app
            .send(
                "POST",
                "/connections/t1/openai",
                Some(json!({"credentials": {"apiKey": "sk-test"}})),
            )
            .await;
        let id = json_body(response).await["connection"]["id"]
            .as_str()
            .expect("id")
            .to_string();

        let uri = format!("/connections/t1/openai/{id}");
        let response = app
            .send("PUT", &uri, Some(json!({"name": "Production key"})))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["connection"]["name"], "Production key");

        let response = app.send("DELETE", &uri, None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.send("DELETE", &uri, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["errorCode"], "CONNECTION_NOT_FOUND");
    }

    #[tokio::test]
    async fn refresh_without_oauth_client() {
        let app = app().await;
        let connection = Connection::new(
            TenantId::from_static("t1"),
            IntegrationId::from_static("msgraph"),
            "Outlook",
        );
        app.store.insert_connection(&connection).await.expect("insert");

        let uri = format!("/connections/t1/msgraph/{}/refresh", connection.id);
        let response = app.send("POST", &uri, None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["errorCode"], "OAUTH_NOT_CONFIGURED");
    }
}
