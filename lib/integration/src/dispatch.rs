//! Tool dispatch: registry lookup, credential resolution, execution.

use crate::error::DispatchError;
use crate::registry::{IntegrationRegistry, ToolResult};
use crate::resolver::CredentialResolver;
use easemail_core::TenantId;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, instrument};

/// Routes a tenant's tool call to the owning integration.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<IntegrationRegistry>,
    resolver: CredentialResolver,
}

impl ToolDispatcher {
    #[must_use]
    pub fn new(registry: Arc<IntegrationRegistry>, resolver: CredentialResolver) -> Self {
        Self { registry, resolver }
    }

    /// Executes `tool_name` for `tenant_id`.
    ///
    /// Resolved credentials live only for the duration of this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool is unknown, credentials cannot be
    /// resolved or the call cannot be built. A vendor rejecting the call is
    /// a failed [`ToolResult`].
    #[instrument(skip(self, parameters), fields(tenant_id = %tenant_id))]
    pub async fn dispatch(
        &self,
        tenant_id: &TenantId,
        tool_name: &str,
        parameters: JsonValue,
        account_email: Option<&str>,
    ) -> Result<ToolResult, DispatchError> {
        let (integration, _) =
            self.registry
                .get_tool(tool_name)
                .ok_or_else(|| DispatchError::UnknownTool {
                    tool: tool_name.to_string(),
                })?;

        let resolved = self
            .resolver
            .resolve(integration.id(), tenant_id, account_email)
            .await?;

        let result = integration
            .execute(tool_name, parameters, &resolved.credentials)
            .await
            .map_err(|e| DispatchError::InvalidCall {
                details: e.to_string(),
            })?;
        info!(
            integration_id = %integration.id(),
            mode = %resolved.mode,
            success = result.success,
            latency_ms = result.metadata.latency_ms,
            "tool dispatched"
        );
        Ok(result)
    }
}
