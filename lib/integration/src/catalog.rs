//! Static catalog of supported integrations.
//!
//! Entries are immutable and built once at process start. Platform
//! configuration and tenant connections layer on top of them.

use crate::auth::AuthScheme;
use crate::model::IntegrationMode;
use easemail_core::IntegrationId;
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use std::fmt;

/// Grouping shown in the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Ai,
    Payments,
    Crm,
    Productivity,
    Voice,
    Legal,
    Email,
    Calendar,
    Communication,
}

impl Category {
    /// Every category, in display order.
    pub const ALL: [Category; 9] = [
        Category::Ai,
        Category::Payments,
        Category::Crm,
        Category::Productivity,
        Category::Voice,
        Category::Legal,
        Category::Email,
        Category::Calendar,
        Category::Communication,
    ];

    /// Returns the wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Payments => "payments",
            Self::Crm => "crm",
            Self::Productivity => "productivity",
            Self::Voice => "voice",
            Self::Legal => "legal",
            Self::Email => "email",
            Self::Calendar => "calendar",
            Self::Communication => "communication",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How tenants authenticate with the vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    ApiKey,
    Oauth2,
}

/// Input kind of a credential field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Password,
    Url,
}

/// One field of an integration's credential form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialField {
    pub key: &'static str,
    pub label: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
}

impl CredentialField {
    /// A required secret field.
    #[must_use]
    pub const fn secret(key: &'static str, label: &'static str) -> Self {
        Self {
            key,
            label,
            field_type: FieldType::Password,
            required: true,
        }
    }

    /// A required plain-text field.
    #[must_use]
    pub const fn text(key: &'static str, label: &'static str) -> Self {
        Self {
            key,
            label,
            field_type: FieldType::Text,
            required: true,
        }
    }

    /// Marks the field optional.
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// HTTP method of a REST tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// True for methods whose parameters travel in the query string.
    #[must_use]
    pub fn uses_query(&self) -> bool {
        matches!(self, Self::Get | Self::Delete)
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A declarative single-request tool.
///
/// `path` may contain `{name}` placeholders filled from call parameters,
/// falling back to credential fields of the same name.
#[derive(Debug, Clone)]
pub struct RestTool {
    pub name: &'static str,
    pub description: &'static str,
    pub method: HttpMethod,
    pub path: &'static str,
    pub input_schema: JsonValue,
}

impl RestTool {
    /// Creates a tool with an empty object schema.
    #[must_use]
    pub fn new(
        name: &'static str,
        description: &'static str,
        method: HttpMethod,
        path: &'static str,
    ) -> Self {
        Self {
            name,
            description,
            method,
            path,
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    /// Sets the input schema.
    #[must_use]
    pub fn with_input_schema(mut self, schema: JsonValue) -> Self {
        self.input_schema = schema;
        self
    }

    /// Names of the `{placeholder}` segments in the path template.
    #[must_use]
    pub fn path_params(&self) -> Vec<&'static str> {
        self.path
            .split('/')
            .filter_map(|seg| seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')))
            .collect()
    }
}

/// A catalog entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationDefinition {
    pub id: IntegrationId,
    pub name: &'static str,
    pub description: &'static str,
    pub category: Category,
    pub auth_type: AuthType,
    pub credential_fields: Vec<CredentialField>,
    pub default_mode: IntegrationMode,
    pub oauth_scopes: Vec<&'static str>,
    pub docs_url: &'static str,
    #[serde(skip)]
    pub base_url: &'static str,
    #[serde(skip)]
    pub auth: AuthScheme,
    #[serde(skip)]
    pub default_headers: Vec<(&'static str, &'static str)>,
    #[serde(skip)]
    pub tools: Vec<RestTool>,
}

impl IntegrationDefinition {
    /// Creates an entry with bearer auth on `apiKey` and no fields or tools.
    #[must_use]
    pub fn new(id: &'static str, name: &'static str, category: Category) -> Self {
        Self {
            id: IntegrationId::from_static(id),
            name,
            description: "",
            category,
            auth_type: AuthType::ApiKey,
            credential_fields: Vec::new(),
            default_mode: IntegrationMode::Byok,
            oauth_scopes: Vec::new(),
            docs_url: "",
            base_url: "",
            auth: AuthScheme::Bearer { field: "apiKey" },
            default_headers: Vec::new(),
            tools: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: &'static str) -> Self {
        self.base_url = base_url;
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthScheme) -> Self {
        self.auth = auth;
        self
    }

    /// Marks the integration as OAuth2 with the given scopes.
    #[must_use]
    pub fn with_oauth(mut self, scopes: &[&'static str]) -> Self {
        self.auth_type = AuthType::Oauth2;
        self.oauth_scopes = scopes.to_vec();
        self
    }

    #[must_use]
    pub fn with_field(mut self, field: CredentialField) -> Self {
        self.credential_fields.push(field);
        self
    }

    #[must_use]
    pub fn with_default_mode(mut self, mode: IntegrationMode) -> Self {
        self.default_mode = mode;
        self
    }

    #[must_use]
    pub fn with_docs(mut self, url: &'static str) -> Self {
        self.docs_url = url;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.default_headers.push((name, value));
        self
    }

    #[must_use]
    pub fn with_tool(mut self, tool: RestTool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Keys of required credential fields.
    #[must_use]
    pub fn required_fields(&self) -> Vec<&'static str> {
        self.credential_fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.key)
            .collect()
    }

    /// True for OAuth2 integrations.
    #[must_use]
    pub fn is_oauth(&self) -> bool {
        self.auth_type == AuthType::Oauth2
    }
}

/// The immutable set of integration definitions.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<IntegrationDefinition>,
}

impl Catalog {
    /// Creates a catalog from explicit entries.
    #[must_use]
    pub fn new(entries: Vec<IntegrationDefinition>) -> Self {
        Self { entries }
    }

    /// The built-in catalog.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(builtin_definitions())
    }

    /// Looks up an entry.
    #[must_use]
    pub fn get(&self, id: &IntegrationId) -> Option<&IntegrationDefinition> {
        self.entries.iter().find(|e| &e.id == id)
    }

    /// Iterates entries in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &IntegrationDefinition> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn string_props(props: &[&str], required: &[&str]) -> JsonValue {
    let properties: serde_json::Map<String, JsonValue> = props
        .iter()
        .map(|p| ((*p).to_string(), json!({"type": "string"})))
        .collect();
    json!({"type": "object", "properties": properties, "required": required})
}

fn limit_schema() -> JsonValue {
    json!({"type": "object", "properties": {"limit": {"type": "integer"}}})
}

fn builtin_definitions() -> Vec<IntegrationDefinition> {
    use HttpMethod::{Delete, Get, Post};

    vec![
        IntegrationDefinition::new("openai", "OpenAI", Category::Ai)
            .with_description("GPT models for drafting and summarising email")
            .with_base_url("https://api.openai.com/v1")
            .with_field(CredentialField::secret("apiKey", "API Key"))
            .with_field(CredentialField::text("organizationId", "Organization ID").optional())
            .with_default_mode(IntegrationMode::Included)
            .with_docs("https://platform.openai.com/docs/api-reference")
            .with_tool(RestTool::new("openai_list_models", "List available models", Get, "/models")),
        IntegrationDefinition::new("anthropic", "Anthropic", Category::Ai)
            .with_description("Claude models for drafting and summarising email")
            .with_base_url("https://api.anthropic.com/v1")
            .with_auth(AuthScheme::Header {
                name: "x-api-key",
                field: "apiKey",
            })
            .with_header("anthropic-version", "2023-06-01")
            .with_field(CredentialField::secret("apiKey", "API Key"))
            .with_default_mode(IntegrationMode::Included)
            .with_docs("https://docs.anthropic.com/en/api")
            .with_tool(RestTool::new("anthropic_list_models", "List available models", Get, "/models")),
        IntegrationDefinition::new("stripe", "Stripe", Category::Payments)
            .with_description("Payments, customers and invoices")
            .with_base_url("https://api.stripe.com/v1")
            .with_auth(AuthScheme::Bearer { field: "secretKey" })
            .with_field(CredentialField::secret("secretKey", "Secret Key"))
            .with_docs("https://docs.stripe.com/api")
            .with_tool(
                RestTool::new("stripe_list_customers", "List customers", Get, "/customers")
                    .with_input_schema(limit_schema()),
            )
            .with_tool(
                RestTool::new("stripe_get_customer", "Retrieve a customer", Get, "/customers/{customerId}")
                    .with_input_schema(string_props(&["customerId"], &["customerId"])),
            )
            .with_tool(
                RestTool::new("stripe_list_invoices", "List invoices", Get, "/invoices")
                    .with_input_schema(string_props(&["customer", "status"], &[])),
            ),
        IntegrationDefinition::new("airtable", "Airtable", Category::Productivity)
            .with_description("Bases, tables and records")
            .with_base_url("https://api.airtable.com/v0")
            .with_field(CredentialField::secret("apiKey", "Personal Access Token"))
            .with_field(CredentialField::text("baseId", "Default Base ID").optional())
            .with_docs("https://airtable.com/developers/web/api")
            .with_tool(
                RestTool::new("airtable_list_records", "List records in a table", Get, "/{baseId}/{tableName}")
                    .with_input_schema(string_props(&["baseId", "tableName", "view"], &["tableName"])),
            )
            .with_tool(
                RestTool::new("airtable_create_record", "Create a record", Post, "/{baseId}/{tableName}")
                    .with_input_schema(json!({
                        "type": "object",
                        "properties": {
                            "baseId": {"type": "string"},
                            "tableName": {"type": "string"},
                            "fields": {"type": "object"}
                        },
                        "required": ["tableName", "fields"]
                    })),
            ),
        IntegrationDefinition::new("pipedrive", "Pipedrive", Category::Crm)
            .with_description("Deals, persons and activities")
            .with_base_url("https://api.pipedrive.com/v1")
            .with_auth(AuthScheme::Query {
                param: "api_token",
                field: "apiToken",
            })
            .with_field(CredentialField::secret("apiToken", "API Token"))
            .with_docs("https://developers.pipedrive.com/docs/api/v1")
            .with_tool(RestTool::new("pipedrive_list_deals", "List deals", Get, "/deals").with_input_schema(limit_schema()))
            .with_tool(
                RestTool::new("pipedrive_search_persons", "Search persons", Get, "/persons/search")
                    .with_input_schema(string_props(&["term"], &["term"])),
            ),
        IntegrationDefinition::new("close", "Close", Category::Crm)
            .with_description("Leads, contacts and activities")
            .with_base_url("https://api.close.com/api/v1")
            .with_auth(AuthScheme::Basic {
                username_field: "apiKey",
                password_field: None,
            })
            .with_field(CredentialField::secret("apiKey", "API Key"))
            .with_docs("https://developer.close.com")
            .with_tool(
                RestTool::new("close_list_leads", "List leads", Get, "/lead/")
                    .with_input_schema(string_props(&["query"], &[])),
            )
            .with_tool(
                RestTool::new("close_get_lead", "Retrieve a lead", Get, "/lead/{leadId}/")
                    .with_input_schema(string_props(&["leadId"], &["leadId"])),
            ),
        IntegrationDefinition::new("monday", "monday.com", Category::Productivity)
            .with_description("Boards and items")
            .with_base_url("https://api.monday.com/v2")
            .with_auth(AuthScheme::GraphqlToken { field: "apiToken" })
            .with_field(CredentialField::secret("apiToken", "API Token"))
            .with_docs("https://developer.monday.com/api-reference")
            .with_tool(
                RestTool::new("monday_query", "Run a GraphQL query", Post, "")
                    .with_input_schema(string_props(&["query"], &["query"])),
            ),
        IntegrationDefinition::new("vapi", "Vapi", Category::Voice)
            .with_description("Voice assistants and phone calls")
            .with_base_url("https://api.vapi.ai")
            .with_field(CredentialField::secret("apiKey", "Private API Key"))
            .with_docs("https://docs.vapi.ai/api-reference")
            .with_tool(RestTool::new("vapi_list_assistants", "List assistants", Get, "/assistant").with_input_schema(limit_schema()))
            .with_tool(RestTool::new("vapi_list_calls", "List calls", Get, "/call").with_input_schema(limit_schema())),
        IntegrationDefinition::new("filevine", "Filevine", Category::Legal)
            .with_description("Legal case management")
            .with_base_url("https://api.filevine.io")
            .with_auth(AuthScheme::Bearer { field: "accessToken" })
            .with_oauth(&["fv.api.gateway.access", "tenant", "filevine.v2.api.*"])
            .with_docs("https://developer.filevine.io")
            .with_tool(RestTool::new("filevine_list_projects", "List projects", Get, "/core/projects").with_input_schema(limit_schema()))
            .with_tool(
                RestTool::new("filevine_get_project", "Retrieve a project", Get, "/core/projects/{projectId}")
                    .with_input_schema(string_props(&["projectId"], &["projectId"])),
            ),
        IntegrationDefinition::new("resend", "Resend", Category::Email)
            .with_description("Transactional email delivery")
            .with_base_url("https://api.resend.com")
            .with_field(CredentialField::secret("apiKey", "API Key"))
            .with_docs("https://resend.com/docs/api-reference")
            .with_tool(
                RestTool::new("resend_send_email", "Send an email", Post, "/emails").with_input_schema(
                    string_props(&["from", "to", "subject", "html", "text"], &["from", "to", "subject"]),
                ),
            )
            .with_tool(RestTool::new("resend_list_domains", "List sending domains", Get, "/domains")),
        IntegrationDefinition::new("msgraph", "Microsoft 365", Category::Email)
            .with_description("Outlook mail, calendar and contacts")
            .with_base_url("https://graph.microsoft.com/v1.0")
            .with_auth(AuthScheme::Bearer { field: "accessToken" })
            .with_oauth(&["offline_access", "User.Read", "Mail.ReadWrite", "Calendars.ReadWrite"])
            .with_docs("https://learn.microsoft.com/graph/api/overview")
            .with_tool(RestTool::new("msgraph_list_messages", "List mailbox messages", Get, "/me/messages"))
            .with_tool(RestTool::new("msgraph_list_events", "List calendar events", Get, "/me/events")),
        IntegrationDefinition::new("teams", "Microsoft Teams", Category::Communication)
            .with_description("Teams, channels and chat messages")
            .with_base_url("https://graph.microsoft.com/v1.0")
            .with_auth(AuthScheme::Bearer { field: "accessToken" })
            .with_oauth(&["offline_access", "User.Read", "Team.ReadBasic.All", "ChannelMessage.Send"])
            .with_docs("https://learn.microsoft.com/graph/teams-concept-overview")
            .with_tool(RestTool::new("teams_list_joined_teams", "List joined teams", Get, "/me/joinedTeams"))
            .with_tool(
                RestTool::new(
                    "teams_send_channel_message",
                    "Post a message to a channel",
                    Post,
                    "/teams/{teamId}/channels/{channelId}/messages",
                )
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {
                        "teamId": {"type": "string"},
                        "channelId": {"type": "string"},
                        "body": {"type": "object"}
                    },
                    "required": ["teamId", "channelId", "body"]
                })),
            ),
        IntegrationDefinition::new("calcom", "Cal.com", Category::Calendar)
            .with_description("Scheduling and bookings")
            .with_base_url("https://api.cal.com/v1")
            .with_auth(AuthScheme::Query {
                param: "apiKey",
                field: "apiKey",
            })
            .with_field(CredentialField::secret("apiKey", "API Key"))
            .with_docs("https://cal.com/docs/api-reference")
            .with_tool(RestTool::new("calcom_list_bookings", "List bookings", Get, "/bookings"))
            .with_tool(
                RestTool::new("calcom_cancel_booking", "Cancel a booking", Delete, "/bookings/{bookingId}/cancel")
                    .with_input_schema(string_props(&["bookingId", "reason"], &["bookingId"])),
            ),
        IntegrationDefinition::new("nylas", "Nylas", Category::Email)
            .with_description("Unified email, calendar and contacts")
            .with_base_url("https://api.us.nylas.com/v3")
            .with_field(CredentialField::secret("apiKey", "API Key"))
            .with_field(CredentialField::text("grantId", "Grant ID"))
            .with_docs("https://developer.nylas.com/docs/api/v3")
            .with_tool(
                RestTool::new("nylas_list_messages", "List messages", Get, "/grants/{grantId}/messages")
                    .with_input_schema(limit_schema()),
            )
            .with_tool(
                RestTool::new("nylas_list_events", "List events", Get, "/grants/{grantId}/events")
                    .with_input_schema(string_props(&["calendar_id"], &["calendar_id"])),
            ),
        IntegrationDefinition::new("google", "Google Workspace", Category::Email)
            .with_description("Gmail and Google Calendar")
            .with_base_url("https://www.googleapis.com")
            .with_auth(AuthScheme::Bearer { field: "accessToken" })
            .with_oauth(&[
                "https://www.googleapis.com/auth/gmail.modify",
                "https://www.googleapis.com/auth/calendar",
            ])
            .with_docs("https://developers.google.com/workspace")
            .with_tool(RestTool::new("google_list_messages", "List Gmail messages", Get, "/gmail/v1/users/me/messages"))
            .with_tool(RestTool::new(
                "google_list_events",
                "List primary calendar events",
                Get,
                "/calendar/v3/calendars/primary/events",
            )),
    ]
}
