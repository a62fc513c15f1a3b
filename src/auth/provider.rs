//! Third-party identity providers.
//!
//! Sign-in uses the OAuth2 authorization-code flow: the browser is sent to the
//! provider's consent screen, comes back to the redirect URL with a `code`, and
//! the code is exchanged server-side for an access token that is used once to
//! fetch the user's profile.

use serde::Deserialize;
use url::Url;

use super::{AuthError, User};

const GOOGLE_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const GOOGLE_SCOPES: &str = "openid email profile";

/// An OAuth2 identity provider.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync + std::fmt::Debug {
    /// Consent-screen URL carrying the CSRF `state`.
    fn authorize_url(&self, state: &str) -> Result<Url, AuthError>;

    /// Exchange an authorization code for the signed-in user's identity.
    async fn exchange_code(&self, code: &str) -> Result<User, AuthError>;
}

/// Google sign-in.
#[derive(Debug, Clone)]
pub struct GoogleProvider {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_url: String,
    auth_endpoint: String,
    token_endpoint: String,
    userinfo_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// OpenID Connect userinfo document.
#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

impl GoogleProvider {
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_url: redirect_url.into(),
            auth_endpoint: GOOGLE_AUTH_ENDPOINT.to_string(),
            token_endpoint: GOOGLE_TOKEN_ENDPOINT.to_string(),
            userinfo_endpoint: GOOGLE_USERINFO_ENDPOINT.to_string(),
        }
    }

    /// Point the provider at different endpoints (self-hosted or test servers).
    #[must_use]
    pub fn with_endpoints(
        mut self,
        auth: impl Into<String>,
        token: impl Into<String>,
        userinfo: impl Into<String>,
    ) -> Self {
        self.auth_endpoint = auth.into();
        self.token_endpoint = token.into();
        self.userinfo_endpoint = userinfo.into();
        self
    }
}

#[async_trait::async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorize_url(&self, state: &str) -> Result<Url, AuthError> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Provider("Google client id is not configured".into()));
        }
        Url::parse_with_params(
            &self.auth_endpoint,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", GOOGLE_SCOPES),
                ("state", state),
                ("prompt", "select_account"),
            ],
        )
        .map_err(|e| AuthError::Provider(format!("invalid auth endpoint: {e}")))
    }

    async fn exchange_code(&self, code: &str) -> Result<User, AuthError> {
        let resp = self
            .http
            .post(&self.token_endpoint)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Token exchange rejected");
            return Err(AuthError::Provider(format!(
                "token exchange failed with status {status}"
            )));
        }
        let token: TokenResponse = resp.json().await?;

        let info: UserInfo = self
            .http
            .get(&self.userinfo_endpoint)
            .bearer_auth(&token.access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let email = info
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AuthError::Provider("profile has no email address".into()))?;

        Ok(User {
            id: info.sub,
            email,
            name: info.name,
            avatar_url: info.picture,
        })
    }
}
