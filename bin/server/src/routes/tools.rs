//! Tool catalog and dispatch routes.

use super::tenant;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

/// Body of a tool call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    #[serde(default)]
    pub parameters: JsonValue,
    /// Restricts BYOK resolution to connections bound to this account.
    #[serde(default)]
    pub account_email: Option<String>,
}

/// `GET /tools`
pub async fn list(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({ "tools": state.registry.get_all_tools() })).into_response()
}

/// `POST /tools/{tenant_id}/{tool_name}`
///
/// Vendor failures are a 200 carrying `success: false`.
pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, tool_name)): Path<(String, String)>,
    payload: Result<Json<DispatchRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let tenant_id = tenant(&tenant_id)?;
    let parameters = match request.parameters {
        JsonValue::Null => json!({}),
        other => other,
    };
    let result = state
        .dispatcher
        .dispatch(
            &tenant_id,
            &tool_name,
            parameters,
            request.account_email.as_deref(),
        )
        .await?;
    Ok(Json(result).into_response())
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::*;
    use axum::http::StatusCode;
    use easemail_core::IntegrationId;
    use easemail_integration::{IntegrationConfig, IntegrationMode, IntegrationStore};
    use serde_json::json;

    #[tokio::test]
    async fn lists_configured_tools() {
        let app = app().await;
        let body = json_body(app.send("GET", "/tools", None).await).await;
        let names: Vec<_> = body["tools"]
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert!(names.contains(&"openai_list_models"));
        // OAuth integrations without a client are not callable.
        assert!(!names.iter().any(|n| n.starts_with("msgraph_")));
    }

    #[tokio::test]
    async fn dispatch_surfaces_resolution_codes() {
        let app = app().await;
        app.store
            .upsert_config(&IntegrationConfig::new(
                IntegrationId::from_static("openai"),
                IntegrationMode::Byok,
            ))
            .await
            .expect("upsert");

        let response = app
            .send("POST", "/tools/t1/openai_list_models", Some(json!({})))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["errorCode"], "NO_CONNECTION");

        let response = app
            .send("POST", "/tools/t1/stripe_list_customers", Some(json!({})))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["errorCode"], "NOT_CONFIGURED");

        let response = app.send("POST", "/tools/t1/no_such_tool", Some(json!({}))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["errorCode"], "UNKNOWN_TOOL");
    }
}
