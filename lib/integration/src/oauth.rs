//! OAuth2 refresh-token exchange for OAuth-based integrations.

use crate::error::OAuthError;
use chrono::{DateTime, Utc};
use easemail_core::IntegrationId;
use oauth2::{
    ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl, basic::BasicClient,
};
use rootcause::prelude::Report;
use std::collections::HashMap;
use tracing::{debug, instrument};

/// OAuth client registration for one integration.
#[derive(Clone, Debug)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
}

/// Tokens returned by a successful refresh.
#[derive(Debug)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// A rotated refresh token, when the vendor issued one.
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Option<Vec<String>>,
}

/// Exchanges refresh tokens at each integration's token endpoint.
#[derive(Clone)]
pub struct TokenRefresher {
    clients: HashMap<IntegrationId, OAuthClientConfig>,
    http_client: reqwest::Client,
}

impl TokenRefresher {
    /// Creates a refresher with no registered clients.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self, Report<OAuthError>> {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| OAuthError::Configuration {
                reason: format!("HTTP client error: {e}"),
            })?;
        Ok(Self {
            clients: HashMap::new(),
            http_client,
        })
    }

    /// Registers the OAuth client for an integration.
    ///
    /// # Errors
    ///
    /// Returns an error if the token URL is invalid.
    pub fn register(
        &mut self,
        integration_id: IntegrationId,
        config: OAuthClientConfig,
    ) -> Result<(), Report<OAuthError>> {
        TokenUrl::new(config.token_url.clone()).map_err(|e| OAuthError::Configuration {
            reason: format!("invalid token URL for '{integration_id}': {e}"),
        })?;
        self.clients.insert(integration_id, config);
        Ok(())
    }

    /// True if a client is registered for the integration.
    #[must_use]
    pub fn has_client(&self, integration_id: &IntegrationId) -> bool {
        self.clients.contains_key(integration_id)
    }

    /// Exchanges a refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// Returns an error if no client is registered or the token endpoint
    /// rejects the exchange.
    #[instrument(skip(self, refresh_token), fields(integration_id = %integration_id))]
    pub async fn refresh(
        &self,
        integration_id: &IntegrationId,
        refresh_token: &str,
    ) -> Result<RefreshedTokens, Report<OAuthError>> {
        let config = self
            .clients
            .get(integration_id)
            .ok_or_else(|| OAuthError::NotConfigured {
                integration_id: integration_id.clone(),
            })?;

        let token_url = TokenUrl::new(config.token_url.clone()).map_err(|e| {
            OAuthError::Configuration {
                reason: format!("invalid token URL: {e}"),
            }
        })?;
        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(config.client_secret.clone()))
            .set_token_uri(token_url);

        let token = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http_client)
            .await
            .map_err(|e| OAuthError::TokenExchange {
                reason: e.to_string(),
            })?;

        let expires_at = token
            .expires_in()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);
        debug!(rotated = token.refresh_token().is_some(), "access token refreshed");

        Ok(RefreshedTokens {
            access_token: token.access_token().secret().clone(),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            expires_at,
            scopes: token
                .scopes()
                .map(|scopes| scopes.iter().map(|s| s.to_string()).collect()),
        })
    }
}
