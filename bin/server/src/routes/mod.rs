//! HTTP routes.

pub mod admin;
pub mod connections;
pub mod tools;

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post, put},
};
use easemail_core::{ConnectionId, IntegrationId, TenantId};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/connections/{tenant_id}", get(connections::list))
        .route("/connections/{tenant_id}/health", get(connections::health))
        .route(
            "/connections/{tenant_id}/{integration_id}",
            get(connections::status).post(connections::connect),
        )
        .route(
            "/connections/{tenant_id}/{integration_id}/{connection_id}",
            put(connections::update).delete(connections::disconnect),
        )
        .route(
            "/connections/{tenant_id}/{integration_id}/{connection_id}/test",
            post(connections::test),
        )
        .route(
            "/connections/{tenant_id}/{integration_id}/{connection_id}/refresh",
            post(connections::refresh),
        )
        .route(
            "/admin/integrations/{integration_id}",
            put(admin::set_platform_config),
        )
        .route("/tools", get(tools::list))
        .route("/tools/{tenant_id}/{tool_name}", post(tools::dispatch))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn tenant(value: &str) -> Result<TenantId, ApiError> {
    Ok(TenantId::parse(value)?)
}

fn integration(value: &str) -> Result<IntegrationId, ApiError> {
    Ok(IntegrationId::parse(value)?)
}

fn connection(value: &str) -> Result<ConnectionId, ApiError> {
    Ok(value.parse::<ConnectionId>()?)
}
