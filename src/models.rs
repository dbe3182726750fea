use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Lifecycle of an assistant message, both on the persisted record and on the overlay
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Streaming,
    Thinking,
    Searching,
    Done,
    Error,
}

impl MessageStatus {
    /// True while the backend is still producing output for the message.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Streaming | Self::Thinking | Self::Searching)
    }
}

// Represents a single persisted message in a conversation
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    #[serde(default = "Uuid::new_v4")] // Generate a new UUID if missing during deserialization
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String, // "user" or "assistant"
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    // None for user messages and for records written before generation started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    // Optional metadata (e.g., model used, tokens, cost) kept as a JSON string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

// Represents the metadata for a conversation thread, as shown in the list
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Conversation {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub title: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_streaming: bool,
}

// A file attached to an unsent message
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub url: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ReasoningConfig {
    pub enabled: bool,
    pub effort: ReasoningEffort,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

// --- Conversation detail payload, fetched as four independent reads ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConversationAccess {
    pub has_access: bool,
    #[serde(default)]
    pub is_deleted: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LastUsedModel {
    pub model_id: String,
    pub provider: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConversationDetail {
    pub access: ConversationAccess,
    pub messages: Vec<Message>,
    pub last_used_model: Option<LastUsedModel>,
    pub is_streaming: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_status_uses_lowercase_names() {
        let json = serde_json::to_string(&MessageStatus::Searching).unwrap();
        assert_eq!(json, "\"searching\"");
        let parsed: MessageStatus = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(parsed, MessageStatus::Error);
    }

    #[test]
    fn in_flight_excludes_terminal_states() {
        assert!(MessageStatus::Thinking.is_in_flight());
        assert!(!MessageStatus::Done.is_in_flight());
        assert!(!MessageStatus::Error.is_in_flight());
    }

    #[test]
    fn message_without_status_deserializes() {
        let json = format!(
            r#"{{"id":"{}","conversation_id":"{}","role":"user","content":"hi"}}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let message: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(message.status, None);
        assert_eq!(message.reasoning, None);
    }
}
