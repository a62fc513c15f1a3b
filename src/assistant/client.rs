//! HTTP client for the `OpenAI` Assistants v2 API.

use serde::de::DeserializeOwned;
use serde_json::json;

use super::types::{MessageList, Run, Thread, ThreadMessage};
use super::{AssistantApi, AssistantError};

/// Talks to `/v1/threads/...` with bearer auth.
#[derive(Clone)]
pub struct OpenAiAssistantClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for OpenAiAssistantClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAssistantClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiAssistantClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{path}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn handle<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, AssistantError> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp.json().await?)
        } else {
            let message = resp
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            Err(AssistantError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait::async_trait]
impl AssistantApi for OpenAiAssistantClient {
    async fn create_thread(&self) -> Result<Thread, AssistantError> {
        let resp = self
            .request(reqwest::Method::POST, "/threads")
            .json(&json!({}))
            .send()
            .await?;
        Self::handle(resp).await
    }

    async fn add_message(
        &self,
        thread_id: &str,
        content: &str,
    ) -> Result<ThreadMessage, AssistantError> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/threads/{thread_id}/messages"))
            .json(&json!({ "role": "user", "content": content }))
            .send()
            .await?;
        Self::handle(resp).await
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, AssistantError> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/threads/{thread_id}/runs"))
            .json(&json!({ "assistant_id": assistant_id }))
            .send()
            .await?;
        Self::handle(resp).await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/threads/{thread_id}/runs/{run_id}"),
            )
            .send()
            .await?;
        Self::handle(resp).await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, AssistantError> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/threads/{thread_id}/messages"))
            .send()
            .await?;
        let list: MessageList = Self::handle(resp).await?;
        Ok(list.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::types::{Role, RunStatus};
    use axum::{
        Json, Router,
        extract::Path,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
    };
    use serde_json::Value;

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("authorization").is_some_and(|v| v == "Bearer sk-test")
            && headers.get("openai-beta").is_some_and(|v| v == "assistants=v2")
    }

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn mock_api() -> Router {
        Router::new()
            .route(
                "/v1/threads",
                post(|headers: HeaderMap| async move {
                    if !authorized(&headers) {
                        return Err((StatusCode::UNAUTHORIZED, "bad key".to_string()));
                    }
                    Ok(Json(json!({ "id": "thread_abc", "object": "thread", "created_at": 1 })))
                }),
            )
            .route(
                "/v1/threads/{thread}/messages",
                post(
                    |Path(thread): Path<String>, Json(body): Json<Value>| async move {
                        Json(json!({
                            "id": "msg_u1",
                            "thread_id": thread,
                            "role": body["role"],
                            "created_at": 2,
                            "content": [{ "type": "text", "text": { "value": body["content"], "annotations": [] } }]
                        }))
                    },
                )
                .get(|| async {
                    Json(json!({
                        "object": "list",
                        "data": [
                            { "id": "msg_a1", "role": "assistant", "created_at": 3,
                              "content": [{ "type": "text", "text": { "value": "Hi!", "annotations": [] } }] },
                            { "id": "msg_u1", "role": "user", "created_at": 2, "content": [] }
                        ],
                        "has_more": false
                    }))
                }),
            )
            .route(
                "/v1/threads/{thread}/runs",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["assistant_id"], "asst_1");
                    Json(json!({ "id": "run_1", "thread_id": "thread_abc", "status": "queued" }))
                }),
            )
            .route(
                "/v1/threads/{thread}/runs/{run}",
                get(|Path((thread, run)): Path<(String, String)>| async move {
                    Json(json!({ "id": run, "thread_id": thread, "status": "completed" }))
                }),
            )
    }

    #[tokio::test]
    async fn test_thread_and_run_round_trip() {
        let base = spawn(mock_api()).await;
        let client = OpenAiAssistantClient::new(format!("{base}/"), "sk-test");

        let thread = client.create_thread().await.unwrap();
        assert_eq!(thread.id, "thread_abc");

        let msg = client.add_message(&thread.id, "hello").await.unwrap();
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), Some("hello"));

        let run = client.create_run(&thread.id, "asst_1").await.unwrap();
        assert_eq!(run.status, RunStatus::Queued);

        let run = client.retrieve_run(&thread.id, &run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        let messages = client.list_messages(&thread.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text(), Some("Hi!"));
    }

    #[tokio::test]
    async fn test_api_error_carries_status_and_body() {
        let base = spawn(mock_api()).await;
        let client = OpenAiAssistantClient::new(base, "wrong");

        match client.create_thread().await {
            Err(AssistantError::Api { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "bad key");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }
}
