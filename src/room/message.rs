//! Chat payloads and the envelope they travel in.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::User;

pub const AI_EMAIL: &str = "ai-assistant@gigachat.ai";
pub const AI_NAME: &str = "AI Assistant";
pub const AI_AVATAR: &str = "https://api.dicebear.com/7.x/bottts/svg?seed=gpt";
pub const SYSTEM_EMAIL: &str = "system@gigachat.ai";
pub const SYSTEM_NAME: &str = "System";
pub const SYSTEM_AVATAR: &str = "https://api.dicebear.com/7.x/bottts/svg?seed=system";

/// A single chat message as broadcast to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub message: String,
    pub email: String,
    pub user: String,
    #[serde(default)]
    pub avatar: Option<String>,
    /// RFC 3339, millisecond precision.
    pub timestamp: String,
    #[serde(rename = "isAI", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_ai: bool,
    #[serde(rename = "isSystem", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_system: bool,
}

/// Who authored a payload, for styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    User,
    Ai,
    System,
}

impl ChatPayload {
    pub fn from_user(user: &User, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            email: user.email.clone(),
            user: user.display_name().to_string(),
            avatar: user.avatar_url.clone(),
            timestamp: now(),
            is_ai: false,
            is_system: false,
        }
    }

    pub fn assistant(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            email: AI_EMAIL.to_string(),
            user: AI_NAME.to_string(),
            avatar: Some(AI_AVATAR.to_string()),
            timestamp: now(),
            is_ai: true,
            is_system: false,
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            email: SYSTEM_EMAIL.to_string(),
            user: SYSTEM_NAME.to_string(),
            avatar: Some(SYSTEM_AVATAR.to_string()),
            timestamp: now(),
            is_ai: false,
            is_system: true,
        }
    }

    pub fn kind(&self) -> MessageKind {
        if self.is_ai {
            MessageKind::Ai
        } else if self.is_system {
            MessageKind::System
        } else {
            MessageKind::User
        }
    }
}

/// Envelope for a broadcast on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broadcast {
    #[serde(rename = "type")]
    pub kind: String,
    pub event: String,
    pub payload: ChatPayload,
    /// Position in the room's send order, starting at 1. Assigned by the room.
    #[serde(skip)]
    pub seq: u64,
}

impl Broadcast {
    pub const EVENT_MESSAGE: &'static str = "message";

    pub fn message(payload: ChatPayload) -> Self {
        Self {
            kind: "broadcast".to_string(),
            event: Self::EVENT_MESSAGE.to_string(),
            payload,
            seq: 0,
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn grace() -> User {
        User {
            id: "u-2".into(),
            email: "grace@example.com".into(),
            name: None,
            avatar_url: None,
        }
    }

    #[test]
    fn test_user_payload_shape() {
        let payload = ChatPayload::from_user(&grace(), "hi");
        let value = serde_json::to_value(Broadcast::message(payload)).unwrap();

        assert_eq!(value["type"], "broadcast");
        assert_eq!(value["event"], "message");
        assert_eq!(value["payload"]["user"], "grace@example.com");
        assert!(value["payload"].get("isAI").is_none());
        assert!(value["payload"].get("isSystem").is_none());
        assert!(value["payload"]["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_flags_use_camel_case_keys() {
        let ai = serde_json::to_value(ChatPayload::assistant("x")).unwrap();
        assert_eq!(ai["isAI"], json!(true));
        assert_eq!(ai["email"], AI_EMAIL);

        let sys = serde_json::to_value(ChatPayload::system("x")).unwrap();
        assert_eq!(sys["isSystem"], json!(true));
    }

    #[test]
    fn test_kind() {
        assert_eq!(ChatPayload::assistant("a").kind(), MessageKind::Ai);
        assert_eq!(ChatPayload::system("a").kind(), MessageKind::System);
        assert_eq!(ChatPayload::from_user(&grace(), "a").kind(), MessageKind::User);
    }
}
