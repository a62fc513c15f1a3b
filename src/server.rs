use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{
        Html, IntoResponse, Redirect, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::assistant::{AssistantService, ThreadMessage, ThreadStore};
use crate::auth::middleware::{clear_session_cookie, session_cookie, session_token};
use crate::auth::{
    AuthEvent, CurrentSession, GoogleProvider, MaybeSession, User, session_middleware,
};
use crate::chat::{AiState, ChatStatus, SendOutcome};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::room::{Broadcast, RoomEvent, Subscription};
use crate::{telemetry, ui};

/// Largest accepted request body.
const BODY_LIMIT: usize = 64 * 1024;

pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    config.validate()?;

    let provider = Arc::new(GoogleProvider::new(
        &config.auth.google_client_id,
        &config.auth.google_client_secret,
        &config.auth.redirect_url,
    ));

    let threads = match &config.assistant.thread_store_path {
        Some(path) => ThreadStore::open(path).await?,
        None => ThreadStore::in_memory(),
    };
    info!(name: "assistant.threads.loaded", threads = threads.len(), "Thread store ready");

    let assistant = AssistantService::from_config(&config.assistant);
    let state = AppState::from_parts(Arc::clone(&config), provider, assistant, threads)
        .with_metrics(telemetry::install_metrics());
    state.spawn_auth_listener();

    let app = build_app(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        room = %config.room.name,
        assistant = config.assistant.is_configured(),
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Build the router with every route and middleware layer.
pub fn build_app(state: AppState) -> Router {
    let timeout_duration = if state.config.resilience.timeout_disabled {
        Duration::from_secs(365 * 24 * 60 * 60) // 1 year
    } else {
        Duration::from_secs(state.config.resilience.request_timeout_secs)
    };

    Router::new()
        .route("/", get(index))
        .route("/auth/login", get(auth_login))
        .route("/auth/callback", get(auth_callback))
        .route("/auth/logout", post(auth_logout))
        .route("/api/session", get(api_session))
        .route("/api/room/stream", get(api_room_stream))
        .route("/api/messages", post(api_send_message))
        .route("/api/ai/toggle", post(api_toggle_ai))
        .route("/api/presence", get(api_presence))
        .route("/api/assistant/messages", get(api_assistant_messages))
        .route("/metrics", get(metrics))
        .route("/healthz", get(|| async { "ok" }))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout_duration, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response(),
                }
            },
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::security::rate_limit_middleware,
        ))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Pages and sign-in
// ─────────────────────────────────────────────────────────────────────────────

/// GET / - Chat page, or the sign-in page without a session.
async fn index(State(state): State<AppState>, MaybeSession(session): MaybeSession) -> Html<String> {
    let Some(session) = session else {
        return Html(ui::login_page());
    };
    let room = state.chat.room();
    let page = room.subscribe();
    let online = room.presence_state().len();
    let ai = state.chat.ai_state(&session.user.id);
    Html(ui::chat_page(&session, online, ai, &page.backlog, page.cursor))
}

/// GET /auth/login - Redirect to the identity provider.
async fn auth_login(State(state): State<AppState>) -> Result<Redirect, AppError> {
    let url = state.auth.sign_in_url()?;
    Ok(Redirect::to(url.as_str()))
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// GET /auth/callback - Finish sign-in and set the session cookie.
async fn auth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, AppError> {
    if let Some(error) = params.error {
        tracing::warn!(error = %error, "Sign-in denied by provider");
        return Ok(Redirect::to("/").into_response());
    }
    let (Some(code), Some(csrf)) = (params.code, params.state) else {
        return Err(crate::auth::AuthError::InvalidState.into());
    };

    let session = state.auth.complete_sign_in(&code, &csrf).await?;
    let cookie = session_cookie(
        &session.access_token,
        state.config.auth.session_ttl_secs,
        state.config.auth.cookie_secure,
    );
    Ok(([(header::SET_COOKIE, cookie)], Redirect::to("/")).into_response())
}

/// POST /auth/logout - Sign the user out on every device and clear the cookie.
async fn auth_logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.auth.sign_out(&token);
    }
    ([(header::SET_COOKIE, clear_session_cookie())], Redirect::to("/")).into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SessionResponse {
    user: User,
    expires_at: DateTime<Utc>,
    #[serde(flatten)]
    status: ChatStatus,
}

/// GET /api/session - Who is signed in, plus their chat status.
async fn api_session(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Json<SessionResponse> {
    let status = state.chat.status(&session);
    Json(SessionResponse {
        user: session.user,
        expires_at: session.expires_at,
        status,
    })
}

/// Request body for the send API.
#[derive(Debug, Deserialize)]
struct SendRequest {
    message: String,
}

/// POST /api/messages - Send to the room; waits for the AI reply if enabled.
async fn api_send_message(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendOutcome>, AppError> {
    let outcome = state.chat.send_message(&session, &req.message).await?;
    Ok(Json(outcome))
}

/// POST /api/ai/toggle
async fn api_toggle_ai(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Json<AiState> {
    Json(state.chat.toggle_ai(&session))
}

#[derive(Debug, Serialize)]
struct PresenceResponse {
    online: Vec<String>,
    count: usize,
}

impl PresenceResponse {
    fn new(online: Vec<String>) -> Self {
        Self {
            count: online.len(),
            online,
        }
    }
}

/// GET /api/presence
async fn api_presence(
    State(state): State<AppState>,
    CurrentSession(_session): CurrentSession,
) -> Json<PresenceResponse> {
    Json(PresenceResponse::new(state.chat.room().presence_state()))
}

#[derive(Debug, Serialize)]
struct ThreadResponse {
    thread_id: Option<String>,
    messages: Vec<ThreadMessage>,
}

/// GET /api/assistant/messages - The caller's assistant thread.
async fn api_assistant_messages(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<ThreadResponse>, AppError> {
    let assistant = state
        .chat
        .assistant()
        .ok_or(crate::assistant::AssistantError::NotConfigured)?;
    let Some(thread_id) = state.chat.ensure_thread(&session.user).await else {
        return Ok(Json(ThreadResponse {
            thread_id: None,
            messages: Vec::new(),
        }));
    };
    let messages = assistant.get_thread_messages(&thread_id).await?;
    Ok(Json(ThreadResponse {
        thread_id: Some(thread_id),
        messages,
    }))
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    /// Replay retained messages with a `seq` above this.
    after: Option<u64>,
}

/// What woke the stream up.
enum StreamStep {
    Emit(Event),
    Skip,
    SignedOut,
    End,
}

/// GET /api/room/stream - Live room events for the caller.
///
/// The caller counts as online while the stream is open. Messages arrive as
/// `message` events carrying the payload and its markup for this viewer, with
/// the message `seq` as the event id; presence changes arrive as `presence`
/// events. With `?after=` or a `Last-Event-ID` header (which wins), retained
/// messages past that `seq` are replayed first.
///
/// When the caller signs out anywhere the stream sends `signed_out` and ends.
async fn api_room_stream(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send> {
    let room = state.chat.room().clone();
    let viewer = session.user;

    let mut auth_events = state.auth.subscribe();
    // Signed out between authentication and subscribing.
    let revoked = state.auth.get_session(&session.access_token).is_none();

    let resume = last_event_id(&headers).or(params.after);
    let Subscription {
        mut backlog,
        receiver,
        ..
    } = match resume {
        Some(after) => room.subscribe_after(after),
        None => room.subscribe(),
    };
    if resume.is_none() {
        backlog.clear();
    }

    // Subscribe before tracking so our own presence change is delivered.
    let mut live = BroadcastStream::new(receiver);
    let presence = (!revoked).then(|| room.track(viewer.id.clone()));
    let online = room.presence_state();

    info!(
        name: "room.stream.opened",
        room = %room.name(),
        user_id = %viewer.id,
        replayed = backlog.len(),
        "Stream opened"
    );

    let stream = async_stream::stream! {
        // Held for the life of the connection.
        let _presence = presence;
        if revoked {
            yield signed_out_event();
            return;
        }
        yield presence_event(online);
        for msg in &backlog {
            yield message_event(msg, &viewer.email);
        }

        let mut auth_open = true;
        loop {
            let step = tokio::select! {
                item = live.next() => match item {
                    Some(Ok(RoomEvent::Broadcast(msg))) => {
                        StreamStep::Emit(message_event(&msg, &viewer.email))
                    }
                    Some(Ok(RoomEvent::PresenceSync { online })) => {
                        StreamStep::Emit(presence_event(online))
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        tracing::warn!(skipped, "Room stream lagged; events dropped");
                        StreamStep::Skip
                    }
                    None => StreamStep::End,
                },
                event = auth_events.recv(), if auth_open => match event {
                    Ok(AuthEvent::SignedOut(user)) if user.id == viewer.id => StreamStep::SignedOut,
                    Ok(_) | Err(RecvError::Lagged(_)) => StreamStep::Skip,
                    Err(RecvError::Closed) => {
                        auth_open = false;
                        StreamStep::Skip
                    }
                },
            };
            match step {
                StreamStep::Emit(event) => yield event,
                StreamStep::Skip => {}
                StreamStep::SignedOut => {
                    info!(name: "room.stream.signed_out", user_id = %viewer.id, "Stream closed on sign-out");
                    yield signed_out_event();
                    break;
                }
                StreamStep::End => break,
            }
        }
    };

    Sse::new(stream.map(Ok)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn message_event(msg: &Broadcast, viewer_email: &str) -> Event {
    let data = serde_json::json!({
        "html": ui::render_message(&msg.payload, viewer_email),
        "payload": msg.payload,
    });
    Event::default()
        .event(msg.event.as_str())
        .id(msg.seq.to_string())
        .data(data.to_string())
}

fn signed_out_event() -> Event {
    Event::default().event("signed_out").data("{}")
}

fn presence_event(online: Vec<String>) -> Event {
    let json = serde_json::to_string(&PresenceResponse::new(online)).unwrap_or_else(|_| "{}".to_string());
    Event::default().event("presence").data(json)
}

/// GET /metrics - Prometheus text format.
async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
