//! Platform administration routes.

use super::integration;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    response::{IntoResponse, Response},
};
use easemail_integration::PlatformConfigRequest;
use serde_json::json;
use std::sync::Arc;

/// `PUT /admin/integrations/{integration_id}`
///
/// The response masks platform credentials.
pub async fn set_platform_config(
    State(state): State<Arc<AppState>>,
    Path(integration_id): Path<String>,
    payload: Result<Json<PlatformConfigRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let integration_id = integration(&integration_id)?;
    let config = state
        .broker
        .set_platform_config(&integration_id, request)
        .await?;
    Ok(Json(json!({ "success": true, "config": config })).into_response())
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn included_mode_serves_platform_credentials() {
        let app = app().await;
        let response = app
            .send(
                "PUT",
                "/admin/integrations/anthropic",
                Some(json!({
                    "mode": "INCLUDED",
                    "credentials": {"apiKey": "sk-ant-platform-000000"},
                    "markupPercent": 15.0
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["config"]["mode"], "INCLUDED");
        assert_eq!(body["config"]["maskedCredentials"]["apiKey"], "sk-a****0000");
        assert!(!body.to_string().contains("sk-ant-platform-000000"));

        let response = app
            .send(
                "POST",
                "/connections/t1/anthropic",
                Some(json!({"credentials": {"apiKey": "sk-tenant"}})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn disabling_hides_integration_from_listing() {
        let app = app().await;
        let listed = |body: &serde_json::Value| {
            body["integrations"]
                .as_array()
                .expect("array")
                .iter()
                .any(|e| e["id"] == "vapi")
        };

        let body = json_body(app.send("GET", "/connections/t1", None).await).await;
        assert!(listed(&body));

        let response = app
            .send("PUT", "/admin/integrations/vapi", Some(json!({"mode": "DISABLED"})))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(app.send("GET", "/connections/t1", None).await).await;
        assert!(!listed(&body));
    }

    #[tokio::test]
    async fn unknown_integration_is_404() {
        let app = app().await;
        let response = app
            .send("PUT", "/admin/integrations/nope", Some(json!({"mode": "BYOK"})))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
