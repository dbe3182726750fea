//! Per-conversation composer state that survives navigation.
//!
//! One entry per conversation id plus a global entry used while composing a
//! conversation that does not exist yet. Entries are immutable `Arc`
//! snapshots: a write that changes nothing hands back the existing snapshot.

use crate::models::{Attachment, ReasoningConfig};
use crate::observable::Observable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DraftState {
    pub input: String,
    pub attachments: Vec<Attachment>,
    pub selected_persona_id: Option<Uuid>,
    pub reasoning_config: ReasoningConfig,
    pub temperature: Option<f32>,
}

/// Partial update for a [`DraftState`]. `None` fields are left alone;
/// `temperature: Some(None)` resets the temperature to the model default.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DraftPatch {
    pub input: Option<String>,
    pub attachments: Option<Vec<Attachment>>,
    pub selected_persona_id: Option<Option<Uuid>>,
    pub reasoning_config: Option<ReasoningConfig>,
    pub temperature: Option<Option<f32>>,
}

impl DraftPatch {
    pub fn input(input: impl Into<String>) -> Self {
        Self {
            input: Some(input.into()),
            ..Self::default()
        }
    }

    /// Applies the patch, returning `None` when no field actually changes.
    fn apply(&self, current: &DraftState) -> Option<DraftState> {
        let mut next = current.clone();
        let mut changed = false;

        if let Some(input) = &self.input {
            if *input != current.input {
                next.input = input.clone();
                changed = true;
            }
        }
        if let Some(attachments) = &self.attachments {
            if *attachments != current.attachments {
                next.attachments = attachments.clone();
                changed = true;
            }
        }
        if let Some(persona) = self.selected_persona_id {
            if persona != current.selected_persona_id {
                next.selected_persona_id = persona;
                changed = true;
            }
        }
        if let Some(reasoning) = &self.reasoning_config {
            if *reasoning != current.reasoning_config {
                next.reasoning_config = reasoning.clone();
                changed = true;
            }
        }
        if let Some(temperature) = self.temperature {
            if temperature != current.temperature {
                next.temperature = temperature;
                changed = true;
            }
        }

        changed.then_some(next)
    }
}

/// Which draft entry a composer is allowed to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DraftScope {
    /// Not-yet-created conversation.
    Global,
    /// Conversation that was empty when the composer mounted.
    Conversation(Uuid),
    /// Conversation that already had history; never reads or writes drafts.
    Detached,
}

impl DraftScope {
    pub fn resolve(conversation_id: Option<Uuid>, had_history_at_mount: bool) -> Self {
        match conversation_id {
            None => Self::Global,
            Some(_) if had_history_at_mount => Self::Detached,
            Some(id) => Self::Conversation(id),
        }
    }

    fn key(self) -> Option<Option<Uuid>> {
        match self {
            Self::Global => Some(None),
            Self::Conversation(id) => Some(Some(id)),
            Self::Detached => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DraftStoreState {
    pub global: Arc<DraftState>,
    pub conversations: HashMap<Uuid, Arc<DraftState>>,
}

#[derive(Debug, Default)]
pub struct DraftStore {
    state: Observable<DraftStoreState>,
}

impl DraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DraftStoreState>> {
        self.state.subscribe()
    }

    /// Merges `patch` into the conversation entry (or the global entry when
    /// no id is given) and returns the resulting snapshot.
    ///
    /// A new conversation entry starts from whatever `get_draft_state` would
    /// have returned for it (the global entry), so a partial patch never
    /// drops text the composer was showing.
    pub fn set_draft_state(&self, patch: &DraftPatch, conversation_id: Option<&Uuid>) -> Arc<DraftState> {
        let mut result = None;
        self.state.update(|state| {
            let current = match conversation_id {
                Some(id) => state
                    .conversations
                    .get(id)
                    .map(Arc::clone)
                    .unwrap_or_else(|| Arc::clone(&state.global)),
                None => Arc::clone(&state.global),
            };
            let Some(next) = patch.apply(&current) else {
                result = Some(current);
                return None;
            };
            let next = Arc::new(next);
            result = Some(Arc::clone(&next));

            let mut updated = state.clone();
            match conversation_id {
                Some(id) => {
                    updated.conversations.insert(*id, next);
                }
                None => updated.global = next,
            }
            Some(updated)
        });
        result.unwrap_or_default()
    }

    /// Conversation entry if present, otherwise the global entry.
    pub fn get_draft_state(&self, conversation_id: Option<&Uuid>) -> Arc<DraftState> {
        let state = self.state.get_state();
        conversation_id
            .and_then(|id| state.conversations.get(id))
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&state.global))
    }

    pub fn clear_draft_state(&self, conversation_id: Option<&Uuid>) {
        self.state.update(|state| {
            let mut updated = state.clone();
            match conversation_id {
                Some(id) => {
                    if state.conversations.get(id).map_or(false, |d| **d == DraftState::default()) {
                        return None;
                    }
                    updated.conversations.insert(*id, Arc::default());
                }
                None => {
                    if *state.global == DraftState::default() {
                        return None;
                    }
                    updated.global = Arc::default();
                }
            }
            Some(updated)
        });
    }

    /// Drops every conversation draft and resets the global one (sign-out).
    pub fn clear_all_draft_states(&self) {
        log::info!("Clearing all draft states");
        self.state.replace(DraftStoreState::default());
    }

    /// Reads through the eligibility rule; detached composers always start empty.
    pub fn read_scoped(&self, scope: DraftScope) -> Arc<DraftState> {
        match scope.key() {
            Some(key) => self.get_draft_state(key.as_ref()),
            None => Arc::default(),
        }
    }

    /// Writes through the eligibility rule; returns `None` for detached composers.
    pub fn write_scoped(&self, scope: DraftScope, patch: &DraftPatch) -> Option<Arc<DraftState>> {
        scope.key().map(|key| self.set_draft_state(patch, key.as_ref()))
    }
}
