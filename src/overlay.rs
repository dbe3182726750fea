use crate::models::{Message, MessageStatus};
use crate::observable::Observable;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Transient content for a message that is still being generated.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamOverlay {
    pub message_id: Uuid,
    // None until the first content chunk lands (status-only overlays)
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub status: MessageStatus,
}

impl StreamOverlay {
    fn new(message_id: Uuid) -> Self {
        Self {
            message_id,
            content: None,
            reasoning: None,
            status: MessageStatus::Streaming,
        }
    }
}

pub type OverlayMap = HashMap<Uuid, Arc<StreamOverlay>>;

/// Holds overlays keyed by message id and notifies subscribers on change.
#[derive(Debug, Default)]
pub struct OverlayStore {
    state: Observable<OverlayMap>,
}

impl OverlayStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, message_id: &Uuid) -> Option<Arc<StreamOverlay>> {
        self.state.get_state().get(message_id).cloned()
    }

    pub fn snapshot(&self) -> Arc<OverlayMap> {
        self.state.get_state()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<OverlayMap>> {
        self.state.subscribe()
    }

    pub fn len(&self) -> usize {
        self.state.get_state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_content(&self, message_id: Uuid, content: impl Into<String>) {
        let content = content.into();
        self.upsert(message_id, |overlay| {
            if overlay.content.as_deref() == Some(content.as_str()) {
                return false;
            }
            overlay.content = Some(content);
            true
        });
    }

    pub fn set_reasoning(&self, message_id: Uuid, reasoning: impl Into<String>) {
        let reasoning = reasoning.into();
        self.upsert(message_id, |overlay| {
            if overlay.reasoning.as_deref() == Some(reasoning.as_str()) {
                return false;
            }
            overlay.reasoning = Some(reasoning);
            true
        });
    }

    pub fn set_status(&self, message_id: Uuid, status: MessageStatus) {
        self.upsert(message_id, |overlay| {
            if overlay.status == status {
                return false;
            }
            overlay.status = status;
            true
        });
    }

    /// Appends a streamed delta to the overlay content.
    pub fn append_content(&self, message_id: Uuid, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.upsert(message_id, |overlay| {
            overlay.content.get_or_insert_with(String::new).push_str(delta);
            true
        });
    }

    pub fn append_reasoning(&self, message_id: Uuid, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.upsert(message_id, |overlay| {
            overlay.reasoning.get_or_insert_with(String::new).push_str(delta);
            true
        });
    }

    /// Explicit removal, e.g. when the user dismisses an error or retries.
    pub fn dismiss(&self, message_id: &Uuid) -> bool {
        self.state.update(|map| {
            if !map.contains_key(message_id) {
                return None;
            }
            let mut next = map.clone();
            next.remove(message_id);
            Some(next)
        })
    }

    /// Removes the overlay once the persisted record has caught up.
    ///
    /// Only a terminal-success record whose content is exactly the overlay
    /// content clears it. Error overlays always survive.
    pub fn clear_if_persisted(&self, persisted: &Message) -> bool {
        if persisted.status != Some(MessageStatus::Done) {
            return false;
        }
        let cleared = self.state.update(|map| {
            let overlay = map.get(&persisted.id)?;
            if overlay.status == MessageStatus::Error {
                return None;
            }
            let caught_up = match overlay.content.as_deref() {
                Some(content) => content == persisted.content,
                None => true,
            };
            if !caught_up {
                return None;
            }
            let mut next = map.clone();
            next.remove(&persisted.id);
            Some(next)
        });
        if cleared {
            log::debug!("Overlay for message {} cleared, persisted record caught up", persisted.id);
        }
        cleared
    }

    pub fn clear_all(&self) {
        self.state.update(|map| if map.is_empty() { None } else { Some(OverlayMap::new()) });
    }

    fn upsert<F>(&self, message_id: Uuid, mutate: F)
    where
        F: FnOnce(&mut StreamOverlay) -> bool,
    {
        self.state.update(|map| {
            let mut overlay = match map.get(&message_id) {
                Some(existing) => StreamOverlay::clone(existing),
                None => StreamOverlay::new(message_id),
            };
            let changed = mutate(&mut overlay);
            if !changed && map.contains_key(&message_id) {
                return None;
            }
            let mut next = map.clone();
            next.insert(message_id, Arc::new(overlay));
            Some(next)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn persisted(id: Uuid, content: &str, status: MessageStatus) -> Message {
        Message {
            id,
            conversation_id: Uuid::new_v4(),
            role: "assistant".to_string(),
            content: content.to_string(),
            reasoning: None,
            status: Some(status),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    #[test]
    fn set_content_creates_streaming_overlay() {
        let store = OverlayStore::new();
        let id = Uuid::new_v4();
        store.set_content(id, "Hel");
        let overlay = store.get(&id).unwrap();
        assert_eq!(overlay.content.as_deref(), Some("Hel"));
        assert_eq!(overlay.status, MessageStatus::Streaming);
    }

    #[test]
    fn repeated_upsert_is_idempotent() {
        let store = OverlayStore::new();
        let id = Uuid::new_v4();
        store.set_content(id, "same");
        let before = store.snapshot();
        store.set_content(id, "same");
        store.set_status(id, MessageStatus::Streaming);
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[test]
    fn exact_match_clears_overlay() {
        let store = OverlayStore::new();
        let id = Uuid::new_v4();
        store.set_content(id, "Hello world");
        assert!(store.clear_if_persisted(&persisted(id, "Hello world", MessageStatus::Done)));
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn prefix_match_keeps_overlay() {
        let store = OverlayStore::new();
        let id = Uuid::new_v4();
        store.set_content(id, "Hello world");
        assert!(!store.clear_if_persisted(&persisted(id, "Hello worl", MessageStatus::Done)));
        assert!(store.get(&id).is_some());
    }

    #[test]
    fn streaming_record_never_clears() {
        let store = OverlayStore::new();
        let id = Uuid::new_v4();
        store.set_content(id, "abc");
        assert!(!store.clear_if_persisted(&persisted(id, "abc", MessageStatus::Streaming)));
    }

    #[test]
    fn error_overlay_survives_done_record() {
        let store = OverlayStore::new();
        let id = Uuid::new_v4();
        store.set_content(id, "partial");
        store.set_status(id, MessageStatus::Error);
        assert!(!store.clear_if_persisted(&persisted(id, "partial", MessageStatus::Done)));
        assert!(store.dismiss(&id));
        assert!(store.is_empty());
    }

    #[test]
    fn append_accumulates_deltas() {
        let store = OverlayStore::new();
        let id = Uuid::new_v4();
        store.append_content(id, "T");
        store.append_content(id, "he");
        store.append_reasoning(id, "think");
        let overlay = store.get(&id).unwrap();
        assert_eq!(overlay.content.as_deref(), Some("The"));
        assert_eq!(overlay.reasoning.as_deref(), Some("think"));
    }
}
