//! Vendor authentication schemes.

use crate::credential::CredentialMap;
use crate::error::ToolError;
use reqwest::RequestBuilder;
use rootcause::prelude::Report;

/// How a vendor expects credentials on an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <field>`.
    Bearer { field: &'static str },
    /// `Authorization: Basic base64(<username>:<password>)`. A missing
    /// password field sends an empty password.
    Basic {
        username_field: &'static str,
        password_field: Option<&'static str>,
    },
    /// A vendor-specific header carrying the raw field value.
    Header {
        name: &'static str,
        field: &'static str,
    },
    /// A query-string parameter carrying the raw field value.
    Query {
        param: &'static str,
        field: &'static str,
    },
    /// `Authorization: <field>` with no scheme prefix, as GraphQL APIs
    /// such as Monday expect.
    GraphqlToken { field: &'static str },
}

impl AuthScheme {
    /// Credential fields the scheme reads.
    #[must_use]
    pub fn fields(&self) -> Vec<&'static str> {
        match *self {
            Self::Bearer { field }
            | Self::Header { field, .. }
            | Self::Query { field, .. }
            | Self::GraphqlToken { field } => vec![field],
            Self::Basic {
                username_field,
                password_field,
            } => std::iter::once(username_field)
                .chain(password_field)
                .collect(),
        }
    }

    /// Attaches credentials to a request.
    ///
    /// # Errors
    ///
    /// Returns an error if a field the scheme needs is absent or blank.
    pub fn apply(
        &self,
        request: RequestBuilder,
        credentials: &CredentialMap,
    ) -> Result<RequestBuilder, Report<ToolError>> {
        let request = match *self {
            Self::Bearer { field } => request.bearer_auth(require(credentials, field)?),
            Self::Basic {
                username_field,
                password_field,
            } => {
                let username = require(credentials, username_field)?;
                let password = password_field
                    .and_then(|f| credentials.get(f))
                    .unwrap_or_default();
                request.basic_auth(username, Some(password))
            }
            Self::Header { name, field } => request.header(name, require(credentials, field)?),
            Self::Query { param, field } => {
                request.query(&[(param, require(credentials, field)?)])
            }
            Self::GraphqlToken { field } => request.header(
                reqwest::header::AUTHORIZATION,
                require(credentials, field)?,
            ),
        };
        Ok(request)
    }
}

fn require<'a>(credentials: &'a CredentialMap, field: &str) -> Result<&'a str, Report<ToolError>> {
    credentials.get_present(field).ok_or_else(|| {
        ToolError::MissingCredential {
            field: field.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(scheme: AuthScheme, credentials: &CredentialMap) -> reqwest::Request {
        let client = reqwest::Client::new();
        scheme
            .apply(client.get("https://vendor.test/v1/me"), credentials)
            .expect("apply")
            .build()
            .expect("build")
    }

    #[test]
    fn bearer_sets_authorization() {
        let req = build(
            AuthScheme::Bearer { field: "apiKey" },
            &CredentialMap::new().with("apiKey", "sk-test"),
        );
        assert_eq!(
            req.headers().get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer sk-test")
        );
    }

    #[test]
    fn basic_encodes_username_and_empty_password() {
        let req = build(
            AuthScheme::Basic {
                username_field: "apiKey",
                password_field: None,
            },
            &CredentialMap::new().with("apiKey", "api_123"),
        );
        // base64("api_123:")
        assert_eq!(
            req.headers().get("authorization").and_then(|v| v.to_str().ok()),
            Some("Basic YXBpXzEyMzo=")
        );
    }

    #[test]
    fn query_appends_parameter() {
        let req = build(
            AuthScheme::Query {
                param: "api_token",
                field: "apiToken",
            },
            &CredentialMap::new().with("apiToken", "abc"),
        );
        assert_eq!(req.url().query(), Some("api_token=abc"));
    }

    #[test]
    fn graphql_token_has_no_scheme_prefix() {
        let req = build(
            AuthScheme::GraphqlToken { field: "apiToken" },
            &CredentialMap::new().with("apiToken", "eyJhbGci"),
        );
        assert_eq!(
            req.headers().get("authorization").and_then(|v| v.to_str().ok()),
            Some("eyJhbGci")
        );
    }

    #[test]
    fn missing_field_is_an_error() {
        let client = reqwest::Client::new();
        let result = AuthScheme::Header {
            name: "x-api-key",
            field: "apiKey",
        }
        .apply(client.get("https://vendor.test"), &CredentialMap::new());
        assert!(result.is_err());
    }

    #[test]
    fn basic_fields_include_password() {
        let scheme = AuthScheme::Basic {
            username_field: "user",
            password_field: Some("pass"),
        };
        assert_eq!(scheme.fields(), vec!["user", "pass"]);
    }
}
