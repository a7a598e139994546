//! Catalog-driven REST connector.
//!
//! Each catalog entry becomes one [`RestIntegration`]: a tool call renders
//! the tool's path template, attaches the entry's auth scheme and sends a
//! single request.

use crate::catalog::{IntegrationDefinition, RestTool};
use crate::credential::CredentialMap;
use crate::error::{RegistryError, ToolError};
use crate::registry::{Integration, ToolDefinition, ToolResult, ToolResultMetadata};
use async_trait::async_trait;
use easemail_core::IntegrationId;
use reqwest::Url;
use rootcause::prelude::Report;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::time::Instant;
use tracing::debug;

/// A vendor integration whose tools are single declarative HTTP requests.
pub struct RestIntegration {
    definition: IntegrationDefinition,
    base_url: String,
    client: reqwest::Client,
    oauth_client_configured: bool,
}

impl RestIntegration {
    /// Creates a connector for a catalog entry.
    #[must_use]
    pub fn new(definition: IntegrationDefinition, client: reqwest::Client) -> Self {
        Self {
            base_url: definition.base_url.to_string(),
            definition,
            client,
            oauth_client_configured: false,
        }
    }

    /// Sends tool requests to a different host, keeping the tool paths.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Records whether an OAuth client exists for token refresh. OAuth
    /// integrations without one are reported as unconfigured.
    #[must_use]
    pub fn with_oauth_client(mut self, configured: bool) -> Self {
        self.oauth_client_configured = configured;
        self
    }

    fn tool(&self, name: &str) -> Option<&RestTool> {
        self.definition.tools.iter().find(|t| t.name == name)
    }
}

#[async_trait]
impl Integration for RestIntegration {
    fn id(&self) -> &IntegrationId {
        &self.definition.id
    }

    fn definition(&self) -> &IntegrationDefinition {
        &self.definition
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        self.definition
            .tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name.to_string(),
                description: t.description.to_string(),
                integration_id: self.definition.id.clone(),
                category: self.definition.category,
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }

    fn is_configured(&self) -> bool {
        !self.definition.tools.is_empty()
            && (!self.definition.is_oauth() || self.oauth_client_configured)
    }

    async fn initialize(&self) -> Result<(), Report<RegistryError>> {
        Url::parse(&self.base_url).map_err(|e| RegistryError::InitializationFailed {
            integration_id: self.definition.id.clone(),
            reason: format!("invalid base url: {e}"),
        })?;
        Ok(())
    }

    async fn execute(
        &self,
        tool_name: &str,
        parameters: JsonValue,
        credentials: &CredentialMap,
    ) -> Result<ToolResult, Report<ToolError>> {
        let tool = self.tool(tool_name).ok_or_else(|| ToolError::UnknownTool {
            tool: tool_name.to_string(),
        })?;
        let mut params = match parameters {
            JsonValue::Object(map) => map,
            JsonValue::Null => JsonMap::new(),
            _ => {
                return Err(ToolError::InvalidParameters {
                    tool: tool_name.to_string(),
                    reason: "parameters must be a JSON object".to_string(),
                }
                .into());
            }
        };

        let url = render_url(&self.base_url, tool.path, |name| {
            params
                .remove(name)
                .map(|v| scalar_string(&v))
                .or_else(|| credentials.get_present(name).map(str::to_string))
        })
        .map_err(|e| match e {
            RenderError::MissingParameter(name) => ToolError::InvalidParameters {
                tool: tool_name.to_string(),
                reason: format!("missing path parameter '{name}'"),
            },
            RenderError::InvalidBase(reason) => ToolError::InvalidUrl { reason },
        })?;

        let mut request = self.client.request(tool.method.into(), url);
        for (name, value) in &self.definition.default_headers {
            request = request.header(*name, *value);
        }
        request = if tool.method.uses_query() {
            let pairs: Vec<(String, String)> = params
                .iter()
                .map(|(k, v)| (k.clone(), scalar_string(v)))
                .collect();
            request.query(&pairs)
        } else {
            request.json(&JsonValue::Object(params))
        };
        let request = self.definition.auth.apply(request, credentials)?;

        debug!(integration_id = %self.definition.id, tool = tool_name, "sending tool request");
        let started = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                // Query-string auth puts the credential in the URL.
                return Ok(ToolResult::failure(format!(
                    "{} request failed: {}",
                    self.definition.name,
                    e.without_url()
                ))
                .with_metadata(ToolResultMetadata {
                    latency_ms: elapsed_ms(started),
                    status: None,
                }));
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let data = serde_json::from_str(&body).unwrap_or(JsonValue::String(body));
        let metadata = ToolResultMetadata {
            latency_ms: elapsed_ms(started),
            status: Some(status.as_u16()),
        };

        Ok(if status.is_success() {
            ToolResult::success(data).with_metadata(metadata)
        } else {
            ToolResult::failure(format!("{} returned HTTP {status}", self.definition.name))
                .with_data(data)
                .with_metadata(metadata)
        })
    }
}

/// Why a URL could not be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RenderError {
    MissingParameter(String),
    InvalidBase(String),
}

/// Appends a `/`-separated path template to `base`, filling `{name}`
/// segments from `lookup`. Values are percent-encoded as single segments.
pub(crate) fn render_url(
    base: &str,
    template: &str,
    mut lookup: impl FnMut(&str) -> Option<String>,
) -> Result<Url, RenderError> {
    let mut url = Url::parse(base).map_err(|e| RenderError::InvalidBase(e.to_string()))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| RenderError::InvalidBase(format!("{base} cannot carry a path")))?;
        segments.pop_if_empty();
        for segment in template.split('/').filter(|s| !s.is_empty()) {
            match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => {
                    let value =
                        lookup(name).ok_or_else(|| RenderError::MissingParameter(name.to_string()))?;
                    segments.push(&value);
                }
                None => {
                    segments.push(segment);
                }
            }
        }
        if template.len() > 1 && template.ends_with('/') {
            segments.push("");
        }
    }
    Ok(url)
}

fn scalar_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
