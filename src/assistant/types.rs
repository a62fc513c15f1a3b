//! Wire types of the hosted Assistants API.

use serde::{Deserialize, Serialize};

/// A server-side conversation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    #[serde(default)]
    pub created_at: i64,
}

/// One assistant invocation against a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// Whether polling should stop at this status.
    ///
    /// `requires_action` counts as final: tool outputs are never submitted.
    pub fn is_final(self) -> bool {
        !matches!(
            self,
            Self::Queued | Self::InProgress | Self::Cancelling | Self::Unknown
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message stored in a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub content: Vec<MessageContent>,
}

impl ThreadMessage {
    /// Text of the first content part, if it is text.
    pub fn text(&self) -> Option<&str> {
        match self.content.first()? {
            MessageContent::Text { text } => Some(text.value.as_str()),
            MessageContent::Other => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: TextContent,
    },
    /// Images, file references and anything newer.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    pub value: String,
    #[serde(default)]
    pub annotations: Vec<serde_json::Value>,
}

/// Paged list envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageList {
    pub data: Vec<ThreadMessage>,
    #[serde(default)]
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_message_with_mixed_content() {
        let msg: ThreadMessage = serde_json::from_value(json!({
            "id": "msg_1",
            "object": "thread.message",
            "role": "assistant",
            "created_at": 1_700_000_000,
            "content": [
                { "type": "text", "text": { "value": "Hello!", "annotations": [] } },
                { "type": "image_file", "image_file": { "file_id": "f_1" } }
            ]
        }))
        .unwrap();

        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.text(), Some("Hello!"));
        assert_eq!(msg.content[1], MessageContent::Other);
    }

    #[test]
    fn test_text_needs_leading_text_part() {
        let msg: ThreadMessage = serde_json::from_value(json!({
            "id": "msg_2",
            "role": "assistant",
            "content": [{ "type": "image_url", "image_url": { "url": "x" } }]
        }))
        .unwrap();
        assert_eq!(msg.text(), None);
    }

    #[test]
    fn test_run_status() {
        let run: Run = serde_json::from_value(json!({
            "id": "run_1",
            "thread_id": "thread_1",
            "status": "in_progress"
        }))
        .unwrap();
        assert!(!run.status.is_final());

        let odd: RunStatus = serde_json::from_value(json!("something_new")).unwrap();
        assert_eq!(odd, RunStatus::Unknown);

        for done in [
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::RequiresAction,
            RunStatus::Expired,
        ] {
            assert!(done.is_final(), "{done} should be final");
        }
    }
}
