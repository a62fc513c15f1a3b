//! Giga Chat
//!
//! A browser group chat: users sign in with Google, share one realtime room,
//! and can have an AI assistant answer in the room on their behalf.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP server; the room is streamed to browsers over SSE
//! - **Auth**: OAuth2 sign-in, sessions as signed JWT cookies
//! - **Room**: In-process broadcast channel with presence and replay
//! - **Assistant**: Hosted assistant threads and runs, polled to completion
//! - **UI**: Server-rendered HTML plus a small inline script
//!
//! # Modules
//!
//! - [`auth`]: identity provider, sessions, extractors
//! - [`room`]: channels, payloads, presence
//! - [`assistant`]: assistant API client and run driver
//! - [`chat`]: sending, AI replies, the AI toggle
//! - [`ui`]: page and message markup

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod assistant;
pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod room;
pub mod security;
pub mod server;
pub mod telemetry;
pub mod ui;

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::assistant::{AssistantService, ThreadStore};
use crate::auth::{AuthEvent, AuthService, IdentityProvider};
use crate::chat::ChatService;
use crate::config::AppConfig;
use crate::room::RoomRegistry;
use crate::security::AppRateLimiter;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Global Configuration
    pub config: Arc<AppConfig>,
    /// Sign-in and session tokens.
    pub auth: Arc<AuthService>,
    /// Every channel, by name.
    pub rooms: RoomRegistry,
    /// Chat on the configured room.
    pub chat: Arc<ChatService>,
    /// Global Rate Limiter
    pub rate_limiter: Arc<AppRateLimiter>,
    /// Prometheus exporter, when a recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire services together from their outer dependencies.
    ///
    /// `assistant` is `None` when no assistant is configured; chat then works
    /// without AI replies.
    pub fn from_parts(
        config: Arc<AppConfig>,
        provider: Arc<dyn IdentityProvider>,
        assistant: Option<AssistantService>,
        threads: ThreadStore,
    ) -> Self {
        let auth = Arc::new(AuthService::new(
            provider,
            &config.auth.jwt_secret,
            Duration::from_secs(config.auth.session_ttl_secs),
        ));

        let rooms = RoomRegistry::new(config.room.capacity, config.room.history_limit);
        let room = rooms.channel(&config.room.name);

        let rate_limiter = Arc::new(AppRateLimiter::new(
            config.resilience.requests_per_second,
            config.resilience.burst_size,
        ));

        Self {
            chat: Arc::new(ChatService::new(room, assistant.map(Arc::new), threads)),
            config,
            auth,
            rooms,
            rate_limiter,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }

    /// React to sign-in and sign-out for the life of the process.
    ///
    /// Signing in prepares the user's assistant thread; signing out drops the
    /// user from presence everywhere.
    pub fn spawn_auth_listener(&self) -> JoinHandle<()> {
        let mut events = self.auth.subscribe();
        let chat = Arc::clone(&self.chat);
        let rooms = self.rooms.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(AuthEvent::SignedIn(user)) => {
                        if chat.ensure_thread(&user).await.is_some() {
                            tracing::debug!(user_id = %user.id, "Assistant thread ready");
                        }
                    }
                    Ok(AuthEvent::SignedOut(user)) => rooms.untrack_everywhere(&user.id),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Auth listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
