//! Credential material in its decrypted, in-flight form.
//!
//! Decrypted credentials only exist inside a single resolution, validation
//! or dispatch call. None of these types implement `Serialize` in a way that
//! leaks values into logs: `Debug` output is redacted.

use crate::model::IntegrationMode;
use chrono::{DateTime, Utc};
use easemail_core::ConnectionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field name under which an OAuth access token is merged into a map.
pub const ACCESS_TOKEN_FIELD: &str = "accessToken";

/// Field name under which an OAuth refresh token is merged into a map.
pub const REFRESH_TOKEN_FIELD: &str = "refreshToken";

/// A flat map of credential field name to value.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialMap(BTreeMap<String, String>);

impl CredentialMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Adds a field, returning the map.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns a field value only when it is non-blank.
    #[must_use]
    pub fn get_present(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    /// Removes a field.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Returns true if the map has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the names of `required` fields that are absent or blank.
    #[must_use]
    pub fn missing<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        required
            .into_iter()
            .filter(|field| self.get_present(field).is_none())
            .map(str::to_string)
            .collect()
    }

    /// Copies every field of `other` into this map, overwriting on conflict.
    pub fn merge(&mut self, other: CredentialMap) {
        self.0.extend(other.0);
    }
}

impl fmt::Debug for CredentialMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "[REDACTED]")))
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CredentialMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Everything a validator may inspect about one credential.
#[derive(Debug, Clone, Default)]
pub struct CredentialMaterial {
    /// Credential fields, with OAuth tokens merged in under
    /// [`ACCESS_TOKEN_FIELD`] and [`REFRESH_TOKEN_FIELD`].
    pub credentials: CredentialMap,
    /// When the OAuth access token expires, if known.
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl CredentialMaterial {
    /// Creates material from a plain credential map.
    #[must_use]
    pub fn new(credentials: CredentialMap) -> Self {
        Self {
            credentials,
            token_expires_at: None,
        }
    }

    /// Sets the OAuth token expiry.
    #[must_use]
    pub fn with_token_expiry(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.token_expires_at = expires_at;
        self
    }

    /// Returns the OAuth access token, if any.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.credentials.get_present(ACCESS_TOKEN_FIELD)
    }

    /// Returns the OAuth refresh token, if any.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.credentials.get_present(REFRESH_TOKEN_FIELD)
    }

    /// True when the access token has passed its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.token_expires_at.is_some_and(|at| at <= Utc::now())
    }

    /// True when the access token expires within five minutes.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.token_expires_at
            .is_some_and(|at| at < Utc::now() + chrono::Duration::minutes(5))
    }
}

/// The output of a successful credential resolution.
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    /// The mode the credentials were resolved under (never `Disabled`).
    pub mode: IntegrationMode,
    /// Decrypted credential fields.
    pub credentials: CredentialMap,
    /// The tenant connection the credentials came from (BYOK only).
    pub connection_id: Option<ConnectionId>,
    /// The account the connection is bound to (BYOK only).
    pub account_email: Option<String>,
}

impl ResolvedCredentials {
    /// Platform-supplied credentials.
    #[must_use]
    pub fn included(credentials: CredentialMap) -> Self {
        Self {
            mode: IntegrationMode::Included,
            credentials,
            connection_id: None,
            account_email: None,
        }
    }

    /// Tenant-supplied credentials from a stored connection.
    #[must_use]
    pub fn byok(
        credentials: CredentialMap,
        connection_id: ConnectionId,
        account_email: Option<String>,
    ) -> Self {
        Self {
            mode: IntegrationMode::Byok,
            credentials,
            connection_id: Some(connection_id),
            account_email,
        }
    }
}
