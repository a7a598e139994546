//! Integration registry.
//!
//! The registry is built once by the composition root: integrations are
//! registered through `&mut self`, then the registry is shared behind an
//! `Arc`. Registering a duplicate integration id or tool name is an error.

use crate::catalog::{Category, IntegrationDefinition};
use crate::credential::CredentialMap;
use crate::error::{RegistryError, ToolError};
use async_trait::async_trait;
use easemail_core::IntegrationId;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// A callable tool exposed by an integration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Integration that executes the tool.
    pub integration_id: IntegrationId,
    /// Category of the owning integration.
    pub category: Category,
    /// JSON schema for input parameters.
    pub input_schema: JsonValue,
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Whether the vendor accepted the call.
    pub success: bool,
    /// Response body, when one was received.
    pub data: Option<JsonValue>,
    /// Error message (if failed).
    pub error: Option<String>,
    /// Execution metadata.
    pub metadata: ToolResultMetadata,
}

/// Metadata about tool execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultMetadata {
    /// Wall-clock time of the vendor request in milliseconds.
    pub latency_ms: u64,
    /// Vendor HTTP status, when a response arrived.
    pub status: Option<u16>,
}

impl ToolResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(data: JsonValue) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: ToolResultMetadata::default(),
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metadata: ToolResultMetadata::default(),
        }
    }

    /// Attaches response data.
    #[must_use]
    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }

    /// Adds metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: ToolResultMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// An integration the registry can enumerate and dispatch to.
#[async_trait]
pub trait Integration: Send + Sync {
    /// Catalog id.
    fn id(&self) -> &IntegrationId;

    /// Static catalog entry.
    fn definition(&self) -> &IntegrationDefinition;

    /// Tools this integration exposes.
    fn tools(&self) -> Vec<ToolDefinition>;

    /// True if the integration can serve calls in this process.
    fn is_configured(&self) -> bool;

    /// One-time startup work.
    ///
    /// # Errors
    ///
    /// Returns an error if the integration cannot start; the registry logs
    /// it and carries on with the others.
    async fn initialize(&self) -> Result<(), Report<RegistryError>>;

    /// Executes one tool call with resolved credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the call cannot be built. Vendor-side failures
    /// are a failed [`ToolResult`], not an error.
    async fn execute(
        &self,
        tool: &str,
        parameters: JsonValue,
        credentials: &CredentialMap,
    ) -> Result<ToolResult, Report<ToolError>>;
}

/// Outcome of [`IntegrationRegistry::initialize_all`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializationReport {
    pub initialized: Vec<IntegrationId>,
    pub skipped: Vec<IntegrationId>,
    pub failed: Vec<IntegrationId>,
}

/// Catalog of registered integrations and their tools.
#[derive(Default)]
pub struct IntegrationRegistry {
    integrations: BTreeMap<IntegrationId, Arc<dyn Integration>>,
    tool_owners: HashMap<String, IntegrationId>,
    initialized: OnceCell<InitializationReport>,
}

impl IntegrationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an integration.
    ///
    /// # Errors
    ///
    /// Returns an error if the id or any tool name is already registered;
    /// the registry is left unchanged.
    pub fn register(&mut self, integration: Arc<dyn Integration>) -> Result<(), Report<RegistryError>> {
        let id = integration.id().clone();
        if self.integrations.contains_key(&id) {
            return Err(RegistryError::DuplicateIntegration { integration_id: id }.into());
        }
        let tools = integration.tools();
        for tool in &tools {
            if self.tool_owners.contains_key(&tool.name) {
                return Err(RegistryError::DuplicateTool {
                    tool: tool.name.clone(),
                    integration_id: id,
                }
                .into());
            }
        }
        for tool in tools {
            self.tool_owners.insert(tool.name, id.clone());
        }
        self.integrations.insert(id, integration);
        Ok(())
    }

    /// Initializes every configured integration exactly once.
    ///
    /// Later calls return the first call's report without re-running any
    /// initializer. A failing integration is logged and does not stop the
    /// others.
    pub async fn initialize_all(&self) -> &InitializationReport {
        self.initialized
            .get_or_init(|| async {
                let mut report = InitializationReport::default();
                for (id, integration) in &self.integrations {
                    if !integration.is_configured() {
                        report.skipped.push(id.clone());
                        continue;
                    }
                    match integration.initialize().await {
                        Ok(()) => report.initialized.push(id.clone()),
                        Err(e) => {
                            warn!(integration_id = %id, error = %e, "integration failed to initialize");
                            report.failed.push(id.clone());
                        }
                    }
                }
                info!(
                    initialized = report.initialized.len(),
                    skipped = report.skipped.len(),
                    failed = report.failed.len(),
                    "integrations initialized"
                );
                report
            })
            .await
    }

    /// True once `initialize_all` has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    /// Returns an integration by id.
    #[must_use]
    pub fn get(&self, id: &IntegrationId) -> Option<Arc<dyn Integration>> {
        self.integrations.get(id).cloned()
    }

    /// Returns every integration, ordered by id.
    #[must_use]
    pub fn get_all(&self) -> Vec<Arc<dyn Integration>> {
        self.integrations.values().cloned().collect()
    }

    /// Returns integrations in one category.
    #[must_use]
    pub fn get_by_category(&self, category: Category) -> Vec<Arc<dyn Integration>> {
        self.integrations
            .values()
            .filter(|i| i.definition().category == category)
            .cloned()
            .collect()
    }

    /// Returns integrations that are configured and did not fail to
    /// initialize.
    #[must_use]
    pub fn get_configured(&self) -> Vec<Arc<dyn Integration>> {
        self.integrations
            .iter()
            .filter(|(id, i)| i.is_configured() && !self.failed(id))
            .map(|(_, i)| Arc::clone(i))
            .collect()
    }

    /// Tools of every configured integration.
    #[must_use]
    pub fn get_all_tools(&self) -> Vec<ToolDefinition> {
        self.get_configured()
            .iter()
            .flat_map(|i| i.tools())
            .collect()
    }

    /// Looks up a tool of a configured integration.
    #[must_use]
    pub fn get_tool(&self, name: &str) -> Option<(Arc<dyn Integration>, ToolDefinition)> {
        let owner = self.tool_owners.get(name)?;
        if self.failed(owner) {
            return None;
        }
        let integration = self.integrations.get(owner)?;
        if !integration.is_configured() {
            return None;
        }
        let tool = integration.tools().into_iter().find(|t| t.name == name)?;
        Some((Arc::clone(integration), tool))
    }

    /// Number of registered integrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.integrations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }

    fn failed(&self, id: &IntegrationId) -> bool {
        self.initialized
            .get()
            .is_some_and(|report| report.failed.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{HttpMethod, RestTool};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeIntegration {
        definition: IntegrationDefinition,
        configured: bool,
        fail_init: bool,
        init_calls: AtomicUsize,
    }

    impl FakeIntegration {
        fn new(id: &'static str, category: Category, tool: &'static str) -> Self {
            Self {
                definition: IntegrationDefinition::new(id, id, category)
                    .with_tool(RestTool::new(tool, "test tool", HttpMethod::Get, "/x")),
                configured: true,
                fail_init: false,
                init_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Integration for FakeIntegration {
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
            self.configured
        }

        async fn initialize(&self) -> Result<(), Report<RegistryError>> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err(RegistryError::InitializationFailed {
                    integration_id: self.definition.id.clone(),
                    reason: "boom".to_string(),
                }
                .into());
            }
            Ok(())
        }

        async fn execute(
            &self,
            _tool: &str,
            parameters: JsonValue,
            _credentials: &CredentialMap,
        ) -> Result<ToolResult, Report<ToolError>> {
            Ok(ToolResult::success(parameters))
        }
    }

    #[tokio::test]
    async fn initialize_all_runs_once() {
        let stripe = Arc::new(FakeIntegration::new("stripe", Category::Payments, "stripe_x"));
        let openai = Arc::new(FakeIntegration::new("openai", Category::Ai, "openai_x"));
        let mut registry = IntegrationRegistry::new();
        registry.register(stripe.clone()).expect("register");
        registry.register(openai.clone()).expect("register");

        assert!(!registry.is_initialized());
        let first = registry.initialize_all().await.clone();
        let second = registry.initialize_all().await.clone();

        assert!(registry.is_initialized());
        assert_eq!(first.initialized, second.initialized);
        assert_eq!(first.initialized.len(), 2);
        assert_eq!(stripe.init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(openai.init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn failing_initializer_does_not_abort_others() {
        let mut broken = FakeIntegration::new("vapi", Category::Voice, "vapi_x");
        broken.fail_init = true;
        let mut registry = IntegrationRegistry::new();
        registry.register(Arc::new(broken)).expect("register");
        registry
            .register(Arc::new(FakeIntegration::new("resend", Category::Email, "resend_x")))
            .expect("register");

        let report = registry.initialize_all().await;
        assert_eq!(report.failed, vec![IntegrationId::from_static("vapi")]);
        assert_eq!(report.initialized, vec![IntegrationId::from_static("resend")]);
        assert!(registry.get_tool("vapi_x").is_none());
        assert!(registry.get_tool("resend_x").is_some());
    }

    #[tokio::test]
    async fn unconfigured_integrations_contribute_no_tools() {
        let mut idle = FakeIntegration::new("teams", Category::Communication, "teams_x");
        idle.configured = false;
        let idle = Arc::new(idle);
        let mut registry = IntegrationRegistry::new();
        registry.register(idle.clone()).expect("register");
        registry
            .register(Arc::new(FakeIntegration::new("calcom", Category::Calendar, "calcom_x")))
            .expect("register");

        let report = registry.initialize_all().await;
        assert_eq!(report.skipped, vec![IntegrationId::from_static("teams")]);
        assert_eq!(idle.init_calls.load(Ordering::SeqCst), 0);

        let tools: Vec<_> = registry.get_all_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(tools, vec!["calcom_x"]);
        assert!(registry.get_tool("teams_x").is_none());
        assert!(registry.get(&IntegrationId::from_static("teams")).is_some());
        assert_eq!(registry.get_configured().len(), 1);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut registry = IntegrationRegistry::new();
        registry
            .register(Arc::new(FakeIntegration::new("stripe", Category::Payments, "a")))
            .expect("register");
        let err = registry
            .register(Arc::new(FakeIntegration::new("stripe", Category::Payments, "b")))
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert!(registry.get_tool("b").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_tool_is_rejected() {
        let mut registry = IntegrationRegistry::new();
        registry
            .register(Arc::new(FakeIntegration::new("msgraph", Category::Email, "list")))
            .expect("register");
        assert!(registry
            .register(Arc::new(FakeIntegration::new("google", Category::Email, "list")))
            .is_err());
        assert!(registry.get(&IntegrationId::from_static("google")).is_none());
    }

    #[test]
    fn lookup_by_category() {
        let mut registry = IntegrationRegistry::new();
        registry
            .register(Arc::new(FakeIntegration::new("openai", Category::Ai, "o")))
            .expect("register");
        registry
            .register(Arc::new(FakeIntegration::new("anthropic", Category::Ai, "a")))
            .expect("register");
        registry
            .register(Arc::new(FakeIntegration::new("stripe", Category::Payments, "s")))
            .expect("register");
        assert_eq!(registry.get_by_category(Category::Ai).len(), 2);
        assert!(registry.get_by_category(Category::Legal).is_empty());
    }
}
