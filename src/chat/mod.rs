//! Chat behaviour: sending messages, AI replies, and the AI toggle.
//!
//! Every message goes to the shared room. When the sender has the assistant
//! enabled, the same text is also put to their assistant thread and the reply
//! is broadcast to the room as coming from the assistant. A failed assistant
//! request is announced with a system message; the user can simply resend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::assistant::{AssistantService, ThreadStore};
use crate::auth::{Session, User};
use crate::room::{ChatPayload, Room};
use crate::telemetry;

pub const ASSISTANT_FAILURE_NOTICE: &str =
    "Sorry, I couldn't get a response from the AI assistant. Please try again later.";
pub const AI_ENABLED_NOTICE: &str = "AI Assistant has been enabled.";
pub const AI_DISABLED_NOTICE: &str = "AI Assistant has been disabled.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("still waiting for the assistant's previous reply")]
    AssistantBusy,
}

/// Per-user assistant switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AiState {
    pub enabled: bool,
    pub responding: bool,
}

impl Default for AiState {
    fn default() -> Self {
        Self {
            enabled: true,
            responding: false,
        }
    }
}

/// What happened to the assistant side of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AiOutcome {
    /// AI off, unconfigured, or no thread for the user.
    Skipped,
    Replied,
    /// The run completed without any text to show.
    NoReply,
    Failed,
}

/// What the chat page shows about the room and the user's assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChatStatus {
    pub ai_enabled: bool,
    pub ai_responding: bool,
    pub online: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SendOutcome {
    pub delivered: usize,
    pub ai: AiOutcome,
}

/// Chat operations on one room.
#[derive(Debug)]
pub struct ChatService {
    room: Room,
    assistant: Option<Arc<AssistantService>>,
    threads: ThreadStore,
    users: RwLock<HashMap<String, AiState>>,
    /// Per-user locks so a user never ends up with two threads.
    thread_init: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Clears a user's `responding` flag when the assistant call ends, however it ends.
struct RespondingGuard<'a> {
    chat: &'a ChatService,
    user_id: &'a str,
}

impl Drop for RespondingGuard<'_> {
    fn drop(&mut self) {
        self.chat.update(self.user_id, |s| s.responding = false);
    }
}

impl ChatService {
    #[must_use]
    pub fn new(room: Room, assistant: Option<Arc<AssistantService>>, threads: ThreadStore) -> Self {
        Self {
            room,
            assistant,
            threads,
            users: RwLock::new(HashMap::new()),
            thread_init: Mutex::new(HashMap::new()),
        }
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn assistant(&self) -> Option<&AssistantService> {
        self.assistant.as_deref()
    }

    pub fn ai_state(&self, user_id: &str) -> AiState {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn status(&self, session: &Session) -> ChatStatus {
        let ai = self.ai_state(&session.user.id);
        ChatStatus {
            ai_enabled: ai.enabled,
            ai_responding: ai.responding,
            online: self.room.presence_state().len(),
        }
    }

    /// The user's assistant thread, creating one on first use.
    ///
    /// Returns `None` when no assistant is configured or thread creation
    /// failed; the failure is logged and retried on the next call.
    pub async fn ensure_thread(&self, user: &User) -> Option<String> {
        let assistant = self.assistant.as_ref()?;
        if let Some(id) = self.threads.get(&user.id) {
            return Some(id);
        }

        let lock = {
            let mut locks = self
                .thread_init
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(user.id.clone()).or_default())
        };
        let _init = lock.lock().await;
        if let Some(id) = self.threads.get(&user.id) {
            return Some(id);
        }

        match assistant.create_thread().await {
            Ok(thread) => {
                if let Err(e) = self.threads.insert(&user.id, &thread.id).await {
                    tracing::error!(user_id = %user.id, error = %e, "Failed to persist thread id");
                }
                Some(thread.id)
            }
            Err(e) => {
                tracing::error!(user_id = %user.id, error = %e, "Error initializing assistant thread");
                None
            }
        }
    }

    /// Broadcast a user's message and, if enabled, the assistant's reply.
    #[tracing::instrument(skip(self, session, text), fields(user_id = %session.user.id))]
    pub async fn send_message(&self, session: &Session, text: &str) -> Result<SendOutcome, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let user = &session.user;
        let ask_ai = self.begin_send(&user.id)?;

        let guard = ask_ai.then(|| RespondingGuard {
            chat: self,
            user_id: &user.id,
        });

        let delivered = self.room.send(ChatPayload::from_user(user, text));
        metrics::counter!(telemetry::MESSAGES_SENT, "kind" => "user").increment(1);

        let ai = match guard {
            Some(_guard) => self.ask_assistant(user, text).await,
            None => AiOutcome::Skipped,
        };

        tracing::info!(name: "chat.message.sent", delivered, ai = ?ai, "Message sent");
        Ok(SendOutcome { delivered, ai })
    }

    /// Flip the user's AI switch and announce it to the room.
    pub fn toggle_ai(&self, session: &Session) -> AiState {
        let state = self.update(&session.user.id, |s| s.enabled = !s.enabled);
        let notice = if state.enabled {
            AI_ENABLED_NOTICE
        } else {
            AI_DISABLED_NOTICE
        };
        self.room.send(ChatPayload::system(notice));
        metrics::counter!(telemetry::MESSAGES_SENT, "kind" => "system").increment(1);
        tracing::info!(user_id = %session.user.id, enabled = state.enabled, "AI toggled");
        state
    }

    /// Reject while a reply is pending; otherwise claim `responding` when the
    /// assistant will be asked. Returns whether it will be.
    fn begin_send(&self, user_id: &str) -> Result<bool, ChatError> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let state = users.entry(user_id.to_string()).or_default();
        if state.responding {
            return Err(ChatError::AssistantBusy);
        }
        let ask = state.enabled && self.assistant.is_some();
        state.responding = ask;
        Ok(ask)
    }

    async fn ask_assistant(&self, user: &User, text: &str) -> AiOutcome {
        let Some(assistant) = self.assistant.as_ref() else {
            return AiOutcome::Skipped;
        };
        let Some(thread_id) = self.ensure_thread(user).await else {
            return AiOutcome::Skipped;
        };

        match assistant.send_message_to_assistant(&thread_id, text).await {
            Ok(reply) => match reply.as_ref().and_then(|m| m.text()).filter(|t| !t.is_empty()) {
                Some(reply) => {
                    self.room.send(ChatPayload::assistant(reply));
                    metrics::counter!(telemetry::MESSAGES_SENT, "kind" => "ai").increment(1);
                    AiOutcome::Replied
                }
                None => AiOutcome::NoReply,
            },
            Err(e) => {
                tracing::error!(thread_id = %thread_id, error = %e, "Error getting AI response");
                metrics::counter!(telemetry::ASSISTANT_ERRORS).increment(1);
                self.room.send(ChatPayload::system(ASSISTANT_FAILURE_NOTICE));
                AiOutcome::Failed
            }
        }
    }

    fn update(&self, user_id: &str, f: impl FnOnce(&mut AiState)) -> AiState {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let state = users.entry(user_id.to_string()).or_default();
        f(state);
        *state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::RunStatus;
    use crate::assistant::testing::ScriptedApi;
    use crate::room::{MessageKind, RoomEvent};
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn session(id: &str) -> Session {
        Session {
            access_token: "token".into(),
            user: User {
                id: id.into(),
                email: format!("{id}@example.com"),
                name: Some(id.to_uppercase()),
                avatar_url: None,
            },
            expires_at: Utc::now(),
        }
    }

    fn chat(api: Option<Arc<ScriptedApi>>) -> ChatService {
        let assistant = api.map(|api| {
            Arc::new(AssistantService::new(
                api,
                "asst_1",
                Duration::from_millis(10),
                5,
            ))
        });
        ChatService::new(Room::new("room_one", 32, 0), assistant, ThreadStore::in_memory())
    }

    fn drain(rx: &mut broadcast::Receiver<RoomEvent>) -> Vec<ChatPayload> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let RoomEvent::Broadcast(b) = event {
                out.push(b.payload);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_blank_messages_are_ignored() {
        let chat = chat(None);
        let mut rx = chat.room().subscribe().receiver;
        assert!(matches!(
            chat.send_message(&session("ada"), "   ").await,
            Err(ChatError::EmptyMessage)
        ));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_without_assistant_only_user_message() {
        let chat = chat(None);
        let mut rx = chat.room().subscribe().receiver;

        let outcome = chat.send_message(&session("ada"), "hello").await.unwrap();
        assert_eq!(outcome.ai, AiOutcome::Skipped);
        assert_eq!(outcome.delivered, 1);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message, "hello");
        assert_eq!(sent[0].user, "ADA");
        assert_eq!(sent[0].kind(), MessageKind::User);
    }

    #[tokio::test(start_paused = true)]
    async fn test_assistant_reply_is_broadcast() {
        let api = Arc::new(ScriptedApi::replying(
            "Hi Ada!",
            &[RunStatus::InProgress, RunStatus::Completed],
        ));
        let chat = chat(Some(Arc::clone(&api)));
        let mut rx = chat.room().subscribe().receiver;

        let outcome = chat.send_message(&session("ada"), "hello bot").await.unwrap();
        assert_eq!(outcome.ai, AiOutcome::Replied);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].message, "Hi Ada!");
        assert_eq!(sent[1].kind(), MessageKind::Ai);
        assert!(!chat.ai_state("ada").responding);

        // Thread is created once and reused.
        chat.send_message(&session("ada"), "again").await.unwrap();
        assert_eq!(*api.threads_created.lock().unwrap(), 1);
        let received = api.received.lock().unwrap();
        assert!(received.iter().all(|(thread, _)| thread == "thread_1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_assistant_failure_posts_notice() {
        let api = Arc::new(ScriptedApi {
            fail_add: true,
            ..ScriptedApi::default()
        });
        let chat = chat(Some(api));
        let mut rx = chat.room().subscribe().receiver;

        let outcome = chat.send_message(&session("ada"), "hello").await.unwrap();
        assert_eq!(outcome.ai, AiOutcome::Failed);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].message, ASSISTANT_FAILURE_NOTICE);
        assert_eq!(sent[1].kind(), MessageKind::System);
        assert!(!chat.ai_state("ada").responding);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_disables_assistant() {
        let api = Arc::new(ScriptedApi::replying("reply", &[RunStatus::Completed]));
        let chat = chat(Some(Arc::clone(&api)));
        let mut rx = chat.room().subscribe().receiver;
        let ada = session("ada");

        assert!(!chat.toggle_ai(&ada).enabled);
        let outcome = chat.send_message(&ada, "quiet please").await.unwrap();
        assert_eq!(outcome.ai, AiOutcome::Skipped);
        assert!(chat.toggle_ai(&ada).enabled);

        let sent: Vec<_> = drain(&mut rx).into_iter().map(|p| p.message).collect();
        assert_eq!(
            sent,
            vec![AI_DISABLED_NOTICE, "quiet please", AI_ENABLED_NOTICE]
        );
        assert!(api.received.lock().unwrap().is_empty());

        // Other users keep their own switch.
        assert!(chat.ai_state("bob").enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_while_waiting_for_reply() {
        let api = Arc::new(ScriptedApi::replying("late", &[RunStatus::InProgress]));
        let chat = Arc::new(chat(Some(api)));
        let ada = session("ada");

        let pending = {
            let chat = Arc::clone(&chat);
            let ada = ada.clone();
            tokio::spawn(async move { chat.send_message(&ada, "first").await })
        };
        tokio::task::yield_now().await;
        while !chat.ai_state("ada").responding {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            chat.send_message(&ada, "second").await,
            Err(ChatError::AssistantBusy)
        ));
        // Other users are not blocked.
        assert!(chat.send_message(&session("bob"), "hi").await.is_ok());

        let first = pending.await.unwrap().unwrap();
        assert_eq!(first.ai, AiOutcome::Failed);
        assert!(!chat.ai_state("ada").responding);
    }

    #[tokio::test]
    async fn test_thread_creation_does_not_block_other_users() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let api = Arc::new(ScriptedApi {
            gate: Some(Arc::clone(&gate)),
            ..ScriptedApi::default()
        });
        let chat = Arc::new(chat(Some(Arc::clone(&api))));

        let ada = {
            let chat = Arc::clone(&chat);
            tokio::spawn(async move { chat.ensure_thread(&session("ada").user).await })
        };
        while *api.threads_created.lock().unwrap() == 0 {
            tokio::task::yield_now().await;
        }

        // Ada's request is stuck at the provider; Bob still gets a thread.
        let bob = tokio::time::timeout(
            Duration::from_secs(5),
            chat.ensure_thread(&session("bob").user),
        )
        .await
        .expect("bob waited on ada's thread creation");
        assert_eq!(bob.as_deref(), Some("thread_2"));
        assert!(!ada.is_finished());

        gate.notify_one();
        assert_eq!(ada.await.unwrap().as_deref(), Some("thread_1"));
        assert_eq!(*api.threads_created.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_creates_one_thread() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let api = Arc::new(ScriptedApi {
            gate: Some(Arc::clone(&gate)),
            ..ScriptedApi::default()
        });
        let chat = Arc::new(chat(Some(Arc::clone(&api))));

        let first = {
            let chat = Arc::clone(&chat);
            tokio::spawn(async move { chat.ensure_thread(&session("ada").user).await })
        };
        while *api.threads_created.lock().unwrap() == 0 {
            tokio::task::yield_now().await;
        }
        let second = {
            let chat = Arc::clone(&chat);
            tokio::spawn(async move { chat.ensure_thread(&session("ada").user).await })
        };
        tokio::task::yield_now().await;

        gate.notify_one();
        assert_eq!(first.await.unwrap().as_deref(), Some("thread_1"));
        assert_eq!(second.await.unwrap().as_deref(), Some("thread_1"));
        assert_eq!(*api.threads_created.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_status_counts_presence() {
        let chat = chat(None);
        let ada = session("ada");
        assert_eq!(chat.status(&ada).online, 0);

        let _guard = chat.room().track("ada");
        let status = chat.status(&ada);
        assert_eq!(status.online, 1);
        assert!(status.ai_enabled);
        assert!(!status.ai_responding);

        chat.toggle_ai(&ada);
        assert!(!chat.status(&ada).ai_enabled);
    }
}
