//! Hosted AI assistant integration.
//!
//! The assistant keeps one conversation [`Thread`] per user on the provider's
//! side. Asking it something means appending the user's message to the thread,
//! starting a [`Run`], and polling the run until it settles; the reply is then
//! the newest assistant message in the thread.
//!
//! - [`AssistantApi`]: the provider's REST surface, implemented over HTTP by
//!   [`OpenAiAssistantClient`]
//! - [`AssistantService`]: the message/run/poll loop on top of it
//! - [`ThreadStore`]: which thread belongs to which user

pub mod client;
pub mod threads;
pub mod types;

pub use client::OpenAiAssistantClient;
pub use threads::ThreadStore;
pub use types::{MessageContent, Role, Run, RunStatus, TextContent, Thread, ThreadMessage};

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::AssistantConfig;
use crate::telemetry;

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant is not configured")]
    NotConfigured,

    #[error("assistant request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("assistant API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("assistant run ended with status {0}")]
    RunEnded(RunStatus),

    #[error("assistant run still {status} after {attempts} polls")]
    PollLimit { status: RunStatus, attempts: u32 },
}

/// REST operations of the hosted assistant.
#[async_trait::async_trait]
pub trait AssistantApi: Send + Sync + std::fmt::Debug {
    async fn create_thread(&self) -> Result<Thread, AssistantError>;

    async fn add_message(&self, thread_id: &str, content: &str)
    -> Result<ThreadMessage, AssistantError>;

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, AssistantError>;

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError>;

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, AssistantError>;
}

/// Drives assistant runs for chat messages.
#[derive(Debug, Clone)]
pub struct AssistantService {
    api: Arc<dyn AssistantApi>,
    assistant_id: String,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl AssistantService {
    #[must_use]
    pub fn new(
        api: Arc<dyn AssistantApi>,
        assistant_id: impl Into<String>,
        poll_interval: Duration,
        max_poll_attempts: u32,
    ) -> Self {
        Self {
            api,
            assistant_id: assistant_id.into(),
            poll_interval,
            max_poll_attempts,
        }
    }

    /// Build the HTTP-backed service, or `None` when key or assistant id is missing.
    pub fn from_config(config: &AssistantConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        let api_key = config.api_key.clone()?;
        let assistant_id = config.assistant_id.clone()?;
        let api = Arc::new(OpenAiAssistantClient::new(&config.base_url, api_key));
        Some(Self::new(
            api,
            assistant_id,
            Duration::from_millis(config.poll_interval_ms),
            config.max_poll_attempts,
        ))
    }

    pub async fn create_thread(&self) -> Result<Thread, AssistantError> {
        let thread = self.api.create_thread().await?;
        tracing::info!(name: "assistant.thread.created", thread_id = %thread.id, "Assistant thread created");
        Ok(thread)
    }

    /// Ask the assistant and wait for its answer.
    ///
    /// Returns the newest assistant message in the thread once the run has
    /// completed, or `None` if the thread holds no assistant message.
    #[tracing::instrument(skip(self, message), fields(run_id = tracing::field::Empty))]
    pub async fn send_message_to_assistant(
        &self,
        thread_id: &str,
        message: &str,
    ) -> Result<Option<ThreadMessage>, AssistantError> {
        self.api.add_message(thread_id, message).await?;

        let run = self.api.create_run(thread_id, &self.assistant_id).await?;
        tracing::Span::current().record("run_id", run.id.as_str());
        metrics::counter!(telemetry::ASSISTANT_RUNS).increment(1);

        let mut run = self.api.retrieve_run(thread_id, &run.id).await?;
        let mut attempts = 0;
        while !run.status.is_final() {
            if attempts >= self.max_poll_attempts {
                return Err(AssistantError::PollLimit {
                    status: run.status,
                    attempts,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
            run = self.api.retrieve_run(thread_id, &run.id).await?;
            attempts += 1;
            tracing::trace!(status = %run.status, attempts, "Polled run");
        }

        match run.status {
            RunStatus::Completed => {}
            RunStatus::RequiresAction => {
                tracing::warn!(
                    run_id = %run.id,
                    "Run requires function calling, which is not supported"
                );
                return Err(AssistantError::RunEnded(run.status));
            }
            status => return Err(AssistantError::RunEnded(status)),
        }

        let latest = self
            .get_thread_messages(thread_id)
            .await?
            .into_iter()
            .filter(|m| m.role == Role::Assistant)
            // Listed newest first and `max_by_key` keeps the last of equal
            // keys, so walk backwards to break timestamp ties toward the top.
            .rev()
            .max_by_key(|m| m.created_at);

        tracing::info!(
            name: "assistant.run.completed",
            polls = attempts,
            has_reply = latest.is_some(),
            "Assistant run completed"
        );
        Ok(latest)
    }

    pub async fn get_thread_messages(
        &self,
        thread_id: &str,
    ) -> Result<Vec<ThreadMessage>, AssistantError> {
        self.api.list_messages(thread_id).await
    }
}
