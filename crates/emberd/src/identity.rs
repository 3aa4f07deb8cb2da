//! Identity-provider access: token introspection, authorization-code
//! exchange and profile fetch against the Login-with-Amazon endpoints.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{Config, OauthConfig};

/// Access-token grant returned by the provider token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
}

/// Profile claims for an external voice-platform identity.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalProfile {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub postal_code: Option<String>,
}

/// Machine-readable error body the provider returns on a failed exchange.
#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: String,
    error_description: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("bearer token rejected: {0}")]
    TokenRejected(String),

    #[error("provider error {code}")]
    Provider {
        code: String,
        description: Option<String>,
    },

    #[error("provider returned status {0}")]
    UnexpectedStatus(u16),

    #[error("transport failure talking to provider: {0}")]
    Transport(String),
}

/// External identity-provider capability.
///
/// Everything emberd knows about a voice-platform user comes through this
/// trait; consumers translate [`IdentityError`] into their own taxonomy at
/// the call site.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Validate a bearer token and return the external user id it belongs to.
    async fn external_user_id(&self, token: &str) -> Result<String, IdentityError>;

    /// Exchange an authorization code for an access-token grant.
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, IdentityError>;

    /// Fetch the profile behind an access token.
    async fn fetch_profile(&self, access_token: &str) -> Result<ExternalProfile, IdentityError>;
}

/// Login-with-Amazon client.
pub struct LwaClient {
    http: reqwest::Client,
    token_url: String,
    profile_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl LwaClient {
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        let OauthConfig {
            client_id,
            client_secret,
            token_url,
            profile_url,
            ..
        } = &config.oauth;
        Self {
            http,
            token_url: token_url.clone(),
            profile_url: profile_url.clone(),
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            redirect_uri: config.redirect_uri(),
        }
    }
}

#[async_trait]
impl IdentityProvider for LwaClient {
    async fn external_user_id(&self, token: &str) -> Result<String, IdentityError> {
        // LWA introspects bearer tokens through the same profile endpoint.
        let profile = self.fetch_profile(token).await?;
        Ok(profile.user_id)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, IdentityError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.redirect_uri),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // Surface the provider's machine-readable code when it sent one
            if let Ok(body) = response.json::<ProviderErrorBody>().await {
                return Err(IdentityError::Provider {
                    code: body.error,
                    description: body.error_description,
                });
            }
            return Err(IdentityError::UnexpectedStatus(status.as_u16()));
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ExternalProfile, IdentityError> {
        let response = self
            .http
            .get(&self.profile_url)
            .header("x-amz-access-token", access_token)
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(IdentityError::TokenRejected(format!(
                "profile endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(IdentityError::UnexpectedStatus(status.as_u16()));
        }

        response
            .json::<ExternalProfile>()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))
    }
}
