//! Single-request vendor probes.
//!
//! A probe sends one read-only (or 1-token) request using the catalog
//! entry's base URL and auth scheme, then maps the response onto a
//! [`ValidationResult`].

use crate::auth::AuthScheme;
use crate::catalog::IntegrationDefinition;
use crate::connector::render_url;
use crate::credential::{ACCESS_TOKEN_FIELD, CredentialMaterial};
use crate::validator::{
    GenericOAuthValidator, ValidationDetails, ValidationErrorCode, ValidationResult, Validator,
};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::time::Instant;

/// Extracts account info from a 2xx body, or reports an error the vendor
/// embedded in it.
pub type Inspect = fn(&JsonValue) -> Result<Option<JsonValue>, String>;

/// A declarative one-request validator.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    label: &'static str,
    base_url: String,
    method: Method,
    path: &'static str,
    query: Vec<(&'static str, &'static str)>,
    headers: Vec<(&'static str, &'static str)>,
    body: Option<JsonValue>,
    auth: AuthScheme,
    required: Vec<&'static str>,
    key_format: Option<(&'static str, &'static [&'static str])>,
    oauth: bool,
    inspect: Option<Inspect>,
}

impl HttpProbe {
    /// A GET probe of `path` built from a catalog entry.
    #[must_use]
    pub fn for_definition(definition: &IntegrationDefinition, path: &'static str) -> Self {
        let required = if definition.is_oauth() {
            vec![ACCESS_TOKEN_FIELD]
        } else {
            definition.required_fields()
        };
        Self {
            label: definition.name,
            base_url: definition.base_url.to_string(),
            method: Method::GET,
            path,
            query: Vec::new(),
            headers: definition.default_headers.clone(),
            body: None,
            auth: definition.auth,
            required,
            key_format: None,
            oauth: definition.is_oauth(),
            inspect: None,
        }
    }

    /// Sends the probe to a different host, keeping the path.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sends a POST with a JSON body.
    #[must_use]
    pub fn with_post(mut self, body: JsonValue) -> Self {
        self.method = Method::POST;
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_query(mut self, name: &'static str, value: &'static str) -> Self {
        self.query.push((name, value));
        self
    }

    /// Rejects `field` values without one of `prefixes` before sending.
    #[must_use]
    pub fn with_key_format(mut self, field: &'static str, prefixes: &'static [&'static str]) -> Self {
        self.key_format = Some((field, prefixes));
        self
    }

    #[must_use]
    pub fn with_inspect(mut self, inspect: Inspect) -> Self {
        self.inspect = Some(inspect);
        self
    }

    fn check_key_format(&self, material: &CredentialMaterial) -> Option<ValidationResult> {
        let (field, prefixes) = self.key_format?;
        let value = material.credentials.get(field).unwrap_or_default();
        if prefixes.iter().any(|p| value.starts_with(p)) {
            return None;
        }
        Some(ValidationResult::failure(
            ValidationErrorCode::InvalidKeyFormat,
            format!(
                "{} {field} should start with {}",
                self.label,
                prefixes.join(" or ")
            ),
        ))
    }

    fn classify_status(&self, status: StatusCode) -> ValidationResult {
        match status {
            StatusCode::UNAUTHORIZED if self.oauth => ValidationResult::failure(
                ValidationErrorCode::TokenExpired,
                format!("{} rejected the access token; it has expired or been revoked", self.label),
            ),
            StatusCode::UNAUTHORIZED => ValidationResult::failure(
                ValidationErrorCode::InvalidCredentials,
                format!("{} rejected the credentials", self.label),
            ),
            StatusCode::FORBIDDEN => ValidationResult::failure(
                ValidationErrorCode::InvalidCredentials,
                format!("{} credentials lack the required permissions", self.label),
            ),
            other => ValidationResult::failure(
                ValidationErrorCode::ApiError,
                format!("{} returned HTTP {other}", self.label),
            ),
        }
    }
}

#[async_trait]
impl Validator for HttpProbe {
    fn required_fields(&self) -> Vec<&'static str> {
        self.required.clone()
    }

    async fn check(&self, client: &reqwest::Client, material: &CredentialMaterial) -> ValidationResult {
        if let Some(rejected) = self.check_key_format(material) {
            return rejected;
        }

        let credentials = &material.credentials;
        let url = match render_url(&self.base_url, self.path, |name| {
            credentials.get_present(name).map(str::to_string)
        }) {
            Ok(url) => url,
            Err(e) => {
                return ValidationResult::failure(
                    ValidationErrorCode::UnknownError,
                    format!("cannot build {} probe url: {e:?}", self.label),
                );
            }
        };

        let mut request = client.request(self.method.clone(), url);
        if !self.query.is_empty() {
            request = request.query(&self.query);
        }
        for (name, value) in &self.headers {
            request = request.header(*name, *value);
        }
        if let Some(body) = &self.body {
            request = request.json(body);
        }
        let request = match self.auth.apply(request, credentials) {
            Ok(request) => request,
            Err(e) => {
                return ValidationResult::failure(ValidationErrorCode::MissingCredentials, e.to_string());
            }
        };

        let started = Instant::now();
        let response = request.send().await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                // Query-string auth puts the credential in the URL.
                return ValidationResult::failure(
                    ValidationErrorCode::ConnectionError,
                    format!("Could not reach {}: {}", self.label, e.without_url()),
                )
                .with_latency(latency_ms);
            }
        };

        let status = response.status();
        if !status.is_success() {
            return self.classify_status(status).with_latency(latency_ms);
        }

        let body: JsonValue = response.json().await.unwrap_or(JsonValue::Null);
        let account_info = match self.inspect.map(|inspect| inspect(&body)).transpose() {
            Ok(info) => info.flatten(),
            Err(message) => {
                return ValidationResult::failure(
                    ValidationErrorCode::ApiError,
                    format!("{}: {message}", self.label),
                )
                .with_latency(latency_ms);
            }
        };

        ValidationResult::ok(format!("Connected to {}", self.label))
            .with_latency(latency_ms)
            .with_details(ValidationDetails {
                account_info,
                token_expires_at: material.token_expires_at,
                scopes: None,
            })
    }
}

/// Builds the validator for a built-in catalog entry.
#[must_use]
pub fn builtin_validator(definition: &IntegrationDefinition) -> Option<Arc<dyn Validator>> {
    let probe = |path| HttpProbe::for_definition(definition, path);
    let validator: Arc<dyn Validator> = match definition.id.as_str() {
        "openai" => Arc::new(
            probe("/models")
                .with_key_format("apiKey", &["sk-"])
                .with_inspect(count_data),
        ),
        "anthropic" => Arc::new(
            probe("/models")
                .with_key_format("apiKey", &["sk-ant-"])
                .with_inspect(count_data),
        ),
        "stripe" => Arc::new(
            probe("/account")
                .with_key_format("secretKey", &["sk_", "rk_"])
                .with_inspect(|body| {
                    Ok(Some(json!({
                        "id": body["id"],
                        "email": body["email"],
                        "country": body["country"],
                        "livemode": body["livemode"],
                    })))
                }),
        ),
        "airtable" => Arc::new(probe("/meta/whoami").with_inspect(|body| {
            Ok(Some(json!({"id": body["id"], "email": body["email"]})))
        })),
        "pipedrive" => Arc::new(probe("/users/me").with_inspect(|body| {
            if body["success"] == JsonValue::Bool(false) {
                return Err(body["error"].as_str().unwrap_or("request rejected").to_string());
            }
            let user = &body["data"];
            Ok(Some(json!({"name": user["name"], "email": user["email"], "company": user["company_name"]})))
        })),
        "close" => Arc::new(probe("/me/").with_inspect(|body| {
            let name = format!(
                "{} {}",
                body["first_name"].as_str().unwrap_or_default(),
                body["last_name"].as_str().unwrap_or_default()
            );
            Ok(Some(json!({"name": name.trim(), "email": body["email"]})))
        })),
        "monday" => Arc::new(
            probe("")
                .with_post(json!({"query": "query { me { id name email } }"}))
                .with_inspect(graphql_me),
        ),
        "vapi" => Arc::new(probe("/assistant").with_query("limit", "1")),
        "resend" => Arc::new(probe("/domains").with_key_format("apiKey", &["re_"])),
        "msgraph" => Arc::new(probe("/me").with_inspect(|body| {
            Ok(Some(json!({
                "name": body["displayName"],
                "email": body["mail"].as_str().or_else(|| body["userPrincipalName"].as_str()),
            })))
        })),
        "teams" => Arc::new(probe("/me/joinedTeams").with_inspect(count_value)),
        "calcom" => Arc::new(
            probe("/me")
                .with_key_format("apiKey", &["cal_"])
                .with_inspect(|body| {
                    let user = &body["user"];
                    Ok(Some(json!({"name": user["name"], "email": user["email"]})))
                }),
        ),
        "nylas" => Arc::new(probe("/grants/{grantId}").with_inspect(|body| {
            let grant = &body["data"];
            Ok(Some(json!({
                "email": grant["email"],
                "provider": grant["provider"],
                "status": grant["grant_status"],
            })))
        })),
        _ if definition.is_oauth() => Arc::new(GenericOAuthValidator),
        _ => return None,
    };
    Some(validator)
}

fn count_data(body: &JsonValue) -> Result<Option<JsonValue>, String> {
    let count = body["data"].as_array().map_or(0, Vec::len);
    Ok(Some(json!({"models": count})))
}

fn count_value(body: &JsonValue) -> Result<Option<JsonValue>, String> {
    let count = body["value"].as_array().map_or(0, Vec::len);
    Ok(Some(json!({"teams": count})))
}

fn graphql_me(body: &JsonValue) -> Result<Option<JsonValue>, String> {
    if let Some(first) = body["errors"].as_array().and_then(|errors| errors.first()) {
        return Err(first["message"].as_str().unwrap_or("GraphQL error").to_string());
    }
    if let Some(message) = body["error_message"].as_str() {
        return Err(message.to_string());
    }
    let me = &body["data"]["me"];
    Ok(Some(json!({"id": me["id"], "name": me["name"], "email": me["email"]})))
}
