use crate::models::MessageStatus;
use crate::overlay::OverlayStore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Events emitted by the generation task while an assistant response streams.
// Payloads use camelCase fields, tagged by the event name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    AssistantMessageChunk {
        message_id: Uuid,
        delta: String,
        #[serde(default)]
        is_first_chunk: bool,
    },
    AssistantReasoningChunk {
        message_id: Uuid,
        delta: String,
    },
    AssistantSearchStarted {
        message_id: Uuid,
    },
    AssistantStreamFinished {
        message_id: Uuid,
    },
    AssistantStreamFailed {
        message_id: Uuid,
        #[serde(default)]
        error: Option<String>,
    },
}

impl StreamEvent {
    pub fn message_id(&self) -> Uuid {
        match self {
            Self::AssistantMessageChunk { message_id, .. }
            | Self::AssistantReasoningChunk { message_id, .. }
            | Self::AssistantSearchStarted { message_id }
            | Self::AssistantStreamFinished { message_id }
            | Self::AssistantStreamFailed { message_id, .. } => *message_id,
        }
    }
}

/// Parses a raw event payload. Malformed payloads are logged and dropped.
pub fn parse_stream_event(payload: &str) -> Option<StreamEvent> {
    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            log::warn!("Ignoring malformed stream event: {} - Data: {}", e, payload);
            None
        }
    }
}

impl OverlayStore {
    /// Folds one streamed event into the overlay for its message.
    pub fn apply_stream_event(&self, event: &StreamEvent) {
        match event {
            StreamEvent::AssistantMessageChunk { message_id, delta, is_first_chunk } => {
                if *is_first_chunk {
                    // A first chunk restarts the message (e.g. regenerate)
                    self.set_content(*message_id, delta.as_str());
                } else {
                    self.append_content(*message_id, delta);
                }
                self.set_status(*message_id, MessageStatus::Streaming);
            }
            StreamEvent::AssistantReasoningChunk { message_id, delta } => {
                self.append_reasoning(*message_id, delta);
                self.set_status(*message_id, MessageStatus::Thinking);
            }
            StreamEvent::AssistantSearchStarted { message_id } => {
                self.set_status(*message_id, MessageStatus::Searching);
            }
            StreamEvent::AssistantStreamFinished { message_id } => {
                log::debug!("Stream finished for message {}", message_id);
                self.set_status(*message_id, MessageStatus::Done);
            }
            StreamEvent::AssistantStreamFailed { message_id, error } => {
                log::error!(
                    "Generation failed for message {}: {}",
                    message_id,
                    error.as_deref().unwrap_or("<no error detail>")
                );
                self.set_status(*message_id, MessageStatus::Error);
            }
        }
    }
}
