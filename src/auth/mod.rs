//! Authentication against a third-party identity provider.
//!
//! A successful sign-in yields a [`Session`]: the user's identity plus a signed
//! access token. Tokens are HS256 JWTs so any request can be authenticated
//! without a lookup. Each token carries the user's sign-out epoch; signing out
//! bumps the epoch, which ends every session the user holds on any device.
//!
//! Auth state changes are published as [`AuthEvent`]s so other parts of the
//! app (thread initialisation, presence) can react to them.

mod claims;
pub mod middleware;
pub mod provider;

pub use claims::SessionClaims;
pub use middleware::{CurrentSession, MaybeSession, SESSION_COOKIE, session_middleware};
pub use provider::{GoogleProvider, IdentityProvider};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;
use uuid::Uuid;

/// How long a sign-in `state` stays redeemable.
const STATE_TTL: Duration = Duration::from_secs(10 * 60);

/// An authenticated identity as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

impl User {
    /// Name to show in the chat, falling back to the email address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }
}

/// A signed-in user and their access token.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub access_token: String,
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

/// Auth state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(User),
    SignedOut(User),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("sign-in state is unknown or expired")]
    InvalidState,

    #[error("invalid session token")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("identity provider error: {0}")]
    Provider(String),

    #[error("identity provider request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Issues, verifies and ends sessions.
pub struct AuthService {
    provider: Arc<dyn IdentityProvider>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_ttl: Duration,
    /// Outstanding sign-in `state` values and when they were issued.
    pending: Mutex<HashMap<String, Instant>>,
    /// Sign-out count per user id. Tokens minted under an older epoch are dead.
    epochs: Mutex<HashMap<String, u64>>,
    events: broadcast::Sender<AuthEvent>,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("provider", &self.provider)
            .field("session_ttl", &self.session_ttl)
            .finish()
    }
}

impl AuthService {
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>, secret: &str, session_ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            provider,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            session_ttl,
            pending: Mutex::new(HashMap::new()),
            epochs: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Receive auth state changes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Start a sign-in: remember a fresh `state` and return the consent URL.
    pub fn sign_in_url(&self) -> Result<Url, AuthError> {
        let state = Uuid::new_v4().simple().to_string();
        let url = self.provider.authorize_url(&state)?;

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|_, issued| issued.elapsed() < STATE_TTL);
        pending.insert(state, Instant::now());
        Ok(url)
    }

    /// Finish a sign-in from the provider's redirect.
    #[tracing::instrument(skip(self, code, state))]
    pub async fn complete_sign_in(&self, code: &str, state: &str) -> Result<Session, AuthError> {
        let issued = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(state);
        match issued {
            Some(at) if at.elapsed() < STATE_TTL => {}
            _ => return Err(AuthError::InvalidState),
        }

        let user = self.provider.exchange_code(code).await?;
        let session = self.issue(user)?;

        tracing::info!(
            name: "auth.signed_in",
            user_id = %session.user.id,
            email = %session.user.email,
            "User signed in"
        );
        let _ = self.events.send(AuthEvent::SignedIn(session.user.clone()));
        Ok(session)
    }

    /// Mint a session for an already-verified user.
    pub fn issue(&self, user: User) -> Result<Session, AuthError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.session_ttl).unwrap_or(chrono::Duration::days(7));
        let expires_at = now + ttl;

        let claims = SessionClaims {
            sub: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            avatar: user.avatar_url.clone(),
            iat: unix_secs(now),
            exp: unix_secs(expires_at),
            jti: Uuid::new_v4().to_string(),
            epoch: self.epoch_of(&user.id),
        };
        let access_token = encode(&Header::default(), &claims, &self.encoding)?;

        Ok(Session {
            access_token,
            user,
            expires_at,
        })
    }

    /// Resolve a token into its session, if it is valid and its user has not
    /// signed out since it was issued.
    pub fn get_session(&self, token: &str) -> Option<Session> {
        let claims = self.verify(token).ok()?;
        if claims.epoch != self.epoch_of(&claims.sub) {
            return None;
        }

        let expires_at = Utc
            .timestamp_opt(i64::try_from(claims.exp).ok()?, 0)
            .single()?;
        Some(Session {
            access_token: token.to_string(),
            user: claims.user(),
            expires_at,
        })
    }

    /// Sign the token's user out everywhere: every session they hold stops
    /// resolving. Returns the user, or `None` if the token was not a live
    /// session.
    pub fn sign_out(&self, token: &str) -> Option<User> {
        let claims = self.verify(token).ok()?;

        let mut epochs = self.epochs.lock().unwrap_or_else(PoisonError::into_inner);
        let epoch = epochs.entry(claims.sub.clone()).or_default();
        if *epoch != claims.epoch {
            return None;
        }
        *epoch += 1;
        drop(epochs);

        let user = claims.user();
        tracing::info!(name: "auth.signed_out", user_id = %user.id, "User signed out");
        let _ = self.events.send(AuthEvent::SignedOut(user.clone()));
        Some(user)
    }

    fn epoch_of(&self, user_id: &str) -> u64 {
        self.epochs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }

    fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let data = decode::<SessionClaims>(token, &self.decoding, &Validation::default())?;
        Ok(data.claims)
    }
}

fn unix_secs(t: DateTime<Utc>) -> usize {
    usize::try_from(t.timestamp()).unwrap_or(0)
}
