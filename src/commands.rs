// Entry points for UI event handlers. Ids arrive as strings from the view
// layer; malformed ids are rejected with a message, everything else degrades
// silently inside the stores.

use crate::draft::{DraftPatch, DraftScope, DraftState};
use crate::events::parse_stream_event;
use crate::list_cache::SnapshotKey;
use crate::models::{Conversation, ConversationDetail};
use crate::state::SyncState;
use std::sync::Arc;
use uuid::Uuid;

fn parse_id(kind: &str, raw: &str) -> Result<Uuid, String> {
    Uuid::parse_str(raw).map_err(|_| {
        let err_msg = format!("Invalid {} ID format: {}", kind, raw);
        log::error!("{}", err_msg);
        err_msg
    })
}

fn parse_optional_id(kind: &str, raw: Option<&str>) -> Result<Option<Uuid>, String> {
    raw.map(|raw| parse_id(kind, raw)).transpose()
}

/// Raw JSON payload from the generation stream.
pub fn ingest_stream_event(state: &SyncState, payload: &str) {
    if let Some(event) = parse_stream_event(payload) {
        state.overlays.apply_stream_event(&event);
    }
}

// Error dismissed or retry requested
pub fn dismiss_message_overlay(state: &SyncState, message_id: &str) -> Result<(), String> {
    let id = parse_id("message", message_id)?;
    if !state.overlays.dismiss(&id) {
        log::debug!("No overlay to dismiss for message {}", id);
    }
    Ok(())
}

pub fn hover_conversation(state: &SyncState, conversation_id: &str) -> Result<(), String> {
    let id = parse_id("conversation", conversation_id)?;
    state.prefetch.prefetch_on_intent(id);
    Ok(())
}

/// Navigation into a conversation. Returns the prefetched payload when one
/// is usable; `None` means the caller loads the conversation directly.
pub fn open_conversation(
    state: &SyncState,
    conversation_id: &str,
) -> Result<Option<Arc<ConversationDetail>>, String> {
    let id = parse_id("conversation", conversation_id)?;
    let cached = state.prefetch.get_cached_data(id).map(|entry| entry.payload);
    state.open_conversation(id);
    Ok(cached)
}

pub fn leave_conversation(state: &SyncState, conversation_id: &str) -> Result<(), String> {
    let id = parse_id("conversation", conversation_id)?;
    state.leave_conversation(id);
    Ok(())
}

// Conversation deleted / archived from the list
pub fn forget_conversation(state: &SyncState, conversation_id: &str) -> Result<(), String> {
    let id = parse_id("conversation", conversation_id)?;
    log::info!("Dropping cached state for conversation {}", id);
    state.prefetch.clear_entry(id);
    state.drafts.clear_draft_state(Some(&id));
    Ok(())
}

pub fn read_draft(
    state: &SyncState,
    conversation_id: Option<&str>,
    had_history_at_mount: bool,
) -> Result<Arc<DraftState>, String> {
    let id = parse_optional_id("conversation", conversation_id)?;
    Ok(state.drafts.read_scoped(DraftScope::resolve(id, had_history_at_mount)))
}

pub fn update_draft(
    state: &SyncState,
    conversation_id: Option<&str>,
    had_history_at_mount: bool,
    patch: &DraftPatch,
) -> Result<Option<Arc<DraftState>>, String> {
    let id = parse_optional_id("conversation", conversation_id)?;
    Ok(state.drafts.write_scoped(DraftScope::resolve(id, had_history_at_mount), patch))
}

// After a successful send the composer starts over
pub fn clear_draft(state: &SyncState, conversation_id: Option<&str>) -> Result<(), String> {
    let id = parse_optional_id("conversation", conversation_id)?;
    state.drafts.clear_draft_state(id.as_ref());
    Ok(())
}

pub fn switch_profile(state: &SyncState, user_id: &str, profile_id: Option<String>) {
    state.conversation_list.set_active_key(Some(SnapshotKey::new(user_id, profile_id)));
}

/// Live list query value (`None` while unresolved) to the list to render.
/// `user_id` / `profile_id` name the pair the query was issued for.
pub async fn resolve_conversation_list(
    state: &SyncState,
    user_id: &str,
    profile_id: Option<String>,
    live: Option<Vec<Conversation>>,
) -> Arc<Vec<Conversation>> {
    let key = SnapshotKey::new(user_id, profile_id);
    state.conversation_list.resolve(&key, live).await
}

pub async fn sign_out(state: &SyncState) {
    state.sign_out().await;
}
