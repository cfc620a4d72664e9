use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// First-party platform labels. The field itself is free-form because
/// transports register themselves by name.
pub mod platforms {
    pub const WEB: &str = "web";
    pub const WHATSAPP: &str = "whatsapp";
}

/// One conversation on one platform.
///
/// A user has at most one active session per `(platform, external id)`
/// tuple; ending a session is a soft transition that keeps the row and its
/// messages for history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub platform: String,
    /// Transport-side correlation id, e.g. the WhatsApp conversation id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_session_id: Option<String>,
    pub active: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ChatSession {
    pub fn new(user_id: Uuid, platform: &str, external_session_id: Option<&str>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            platform: platform.to_string(),
            external_session_id: external_session_id.map(str::to_string),
            active: true,
            started_at: Utc::now(),
            ended_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Assistant,
    System,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
            Sender::System => "system",
        }
    }
}

/// A message within a session. Append-only: once written, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sender: Sender,
    pub content: String,
    /// Free-form transport or NLU context carried with the message.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(session_id: Uuid, sender: Sender, content: &str, metadata: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            session_id,
            sender,
            content: content.to_string(),
            metadata,
            created_at: Utc::now(),
        }
    }
}
