use crate::config::SyncConfig;
use crate::draft::DraftStore;
use crate::list_cache::ListSnapshotCache;
use crate::models::Message;
use crate::overlay::OverlayStore;
use crate::prefetch::{ConversationDetailSource, DetailPrefetchCache};
use crate::reconcile::MessageReconciler;
use crate::storage::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

// Process-lifetime state shared by every UI event handler
#[derive(Clone)] // Clones share the same stores
pub struct SyncState {
    pub config: SyncConfig,
    pub overlays: Arc<OverlayStore>,
    pub reconciler: Arc<MessageReconciler>,
    pub drafts: Arc<DraftStore>,
    pub conversation_list: Arc<ListSnapshotCache>,
    pub prefetch: DetailPrefetchCache,
    active_conversation: Arc<Mutex<Option<Uuid>>>,
}

impl SyncState {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn KeyValueStore>,
        source: Arc<dyn ConversationDetailSource>,
    ) -> Self {
        let conversation_list = ListSnapshotCache::new(store, config.max_snapshot_conversations);
        let prefetch = DetailPrefetchCache::new(source, config.prefetch_debounce, config.prefetch_ttl);
        Self {
            config,
            overlays: Arc::new(OverlayStore::new()),
            reconciler: Arc::new(MessageReconciler::new()),
            drafts: Arc::new(DraftStore::new()),
            conversation_list: Arc::new(conversation_list),
            prefetch,
            active_conversation: Arc::new(Mutex::new(None)),
        }
    }

    /// Builds the state with the snapshot store named by the config: SQLite
    /// when a database path is set, memory otherwise.
    pub async fn open(config: SyncConfig, source: Arc<dyn ConversationDetailSource>) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = match &config.snapshot_db_path {
            Some(path) => Arc::new(SqliteKeyValueStore::open(path).await?),
            None => {
                log::info!("No snapshot database configured, list snapshots stay in memory");
                Arc::new(MemoryKeyValueStore::new())
            }
        };
        Ok(Self::new(config, store, source))
    }

    /// Value to render for one persisted message.
    pub fn render_message(&self, persisted: &Arc<Message>) -> Arc<Message> {
        let overlay = self.overlays.get(&persisted.id);
        self.reconciler.reconcile(persisted, overlay.as_ref())
    }

    /// Applies a refreshed persisted message list: overlays whose content the
    /// backend has committed exactly are dropped, then every message is
    /// reconciled against what remains.
    pub fn sync_persisted_messages(&self, messages: &[Arc<Message>]) -> Vec<Arc<Message>> {
        messages
            .iter()
            .map(|message| {
                if self.overlays.clear_if_persisted(message) {
                    self.reconciler.forget(&message.id);
                }
                self.render_message(message)
            })
            .collect()
    }

    pub fn active_conversation(&self) -> Option<Uuid> {
        *self.active_conversation.lock()
    }

    /// Navigation into a conversation; the previously open one is released.
    pub fn open_conversation(&self, conversation_id: Uuid) {
        let previous = self.active_conversation.lock().replace(conversation_id);
        match previous {
            Some(previous) if previous == conversation_id => return,
            Some(previous) => self.prefetch.release_active(previous),
            None => {}
        }
        log::debug!("Conversation {} is now active", conversation_id);
        self.prefetch.mark_active(conversation_id);
    }

    pub fn leave_conversation(&self, conversation_id: Uuid) {
        let mut active = self.active_conversation.lock();
        if *active == Some(conversation_id) {
            *active = None;
        }
        drop(active);
        self.prefetch.release_active(conversation_id);
    }

    /// Purges every per-user cache.
    pub async fn sign_out(&self) {
        log::info!("Signing out: clearing drafts, overlays and conversation caches");
        self.drafts.clear_all_draft_states();
        self.overlays.clear_all();
        self.reconciler.clear();
        self.prefetch.clear_all();
        *self.active_conversation.lock() = None;

        // Detach the list before awaiting storage so no result can land for this user
        let previous = self.conversation_list.active_key();
        self.conversation_list.set_active_key(None);
        if let Some(key) = previous {
            self.conversation_list.forget_user(&key.user_id).await;
        }
    }

    /// Cancels pending timers; call when the UI scope is torn down.
    pub fn shutdown(&self) {
        self.prefetch.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::DraftPatch;
    use crate::list_cache::SnapshotKey;
    use crate::models::{Conversation, ConversationAccess, LastUsedModel, MessageStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Notify;

    struct EmptySource;

    #[async_trait]
    impl ConversationDetailSource for EmptySource {
        async fn fetch_access(&self, _id: Uuid) -> Result<ConversationAccess> {
            Ok(ConversationAccess { has_access: true, is_deleted: false })
        }
        async fn fetch_messages(&self, _id: Uuid) -> Result<Vec<Message>> {
            Ok(Vec::new())
        }
        async fn fetch_last_used_model(&self, _id: Uuid) -> Result<Option<LastUsedModel>> {
            Ok(None)
        }
        async fn fetch_streaming_status(&self, _id: Uuid) -> Result<bool> {
            Ok(false)
        }
    }

    fn state() -> SyncState {
        SyncState::new(SyncConfig::default(), Arc::new(MemoryKeyValueStore::new()), Arc::new(EmptySource))
    }

    fn chat(id: Uuid) -> Conversation {
        Conversation {
            id,
            title: "chat".to_string(),
            created_at: Utc::now(),
            last_updated_at: Utc::now(),
            is_pinned: false,
            is_streaming: false,
        }
    }

    fn assistant(id: Uuid, content: &str, status: MessageStatus) -> Arc<Message> {
        Arc::new(Message {
            id,
            conversation_id: Uuid::nil(),
            role: "assistant".to_string(),
            content: content.to_string(),
            reasoning: None,
            status: Some(status),
            timestamp: Utc::now(),
            metadata: None,
        })
    }

    #[tokio::test]
    async fn streamed_answer_hands_over_to_persisted_record() {
        let state = state();
        let m1 = Uuid::new_v4();

        for chunk in ["T", "Th", "The answer is 4"] {
            state.overlays.set_content(m1, chunk);
            state.overlays.set_status(m1, MessageStatus::Streaming);
        }
        let lagging = assistant(m1, "", MessageStatus::Streaming);
        let rendered = state.sync_persisted_messages(&[lagging]);
        assert_eq!(rendered[0].content, "The answer is 4");

        let committed = assistant(m1, "The answer is 4", MessageStatus::Done);
        let rendered = state.sync_persisted_messages(&[Arc::clone(&committed)]);
        assert!(Arc::ptr_eq(&rendered[0], &committed));
        assert!(state.overlays.get(&m1).is_none());
    }

    #[tokio::test]
    async fn lagging_final_chunk_keeps_overlay() {
        let state = state();
        let m1 = Uuid::new_v4();
        state.overlays.set_content(m1, "Hello world");

        let committed = assistant(m1, "Hello worl", MessageStatus::Done);
        let rendered = state.sync_persisted_messages(&[Arc::clone(&committed)]);
        // Done record wins for rendering, but the overlay waits for the exact match
        assert!(Arc::ptr_eq(&rendered[0], &committed));
        assert!(state.overlays.get(&m1).is_some());
    }

    #[tokio::test]
    async fn switching_conversations_releases_previous() {
        let state = state();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        state.open_conversation(a);
        assert!(state.prefetch.is_active(a));
        state.open_conversation(b);
        assert!(!state.prefetch.is_active(a));
        assert!(state.prefetch.is_active(b));
        assert_eq!(state.active_conversation(), Some(b));

        state.leave_conversation(b);
        assert_eq!(state.active_conversation(), None);
        assert!(!state.prefetch.is_active(b));
    }

    #[tokio::test]
    async fn sign_out_purges_everything() {
        let state = state();
        let conversation = Uuid::new_v4();
        state.drafts.set_draft_state(&DraftPatch::input("unsent"), Some(&conversation));
        state.overlays.set_content(Uuid::new_v4(), "partial");
        let key = SnapshotKey::new("u1", None);
        state.conversation_list.set_active_key(Some(key.clone()));
        state.conversation_list.resolve(&key, Some(vec![chat(conversation)])).await;
        state.open_conversation(conversation);

        state.sign_out().await;

        assert_eq!(state.drafts.get_draft_state(Some(&conversation)).input, "");
        assert!(state.overlays.is_empty());
        assert!(state.conversation_list.active_key().is_none());
        assert!(!state.prefetch.is_active(conversation));

        state.conversation_list.set_active_key(Some(key.clone()));
        assert!(state.conversation_list.resolve(&key, None).await.is_empty());
    }

    // Store whose prefix removal blocks until released
    struct SlowRemovalStore {
        inner: MemoryKeyValueStore,
        removing: Notify,
        gate: Notify,
    }

    #[async_trait]
    impl KeyValueStore for SlowRemovalStore {
        async fn get_raw(&self, key: &str) -> Result<Option<String>> {
            self.inner.get_raw(key).await
        }
        async fn set_raw(&self, key: &str, value: &str) -> Result<()> {
            self.inner.set_raw(key, value).await
        }
        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }
        async fn remove_prefix(&self, prefix: &str) -> Result<()> {
            self.removing.notify_one();
            self.gate.notified().await;
            self.inner.remove_prefix(prefix).await
        }
    }

    #[tokio::test]
    async fn list_result_during_sign_out_is_not_held() {
        let store = Arc::new(SlowRemovalStore {
            inner: MemoryKeyValueStore::new(),
            removing: Notify::new(),
            gate: Notify::new(),
        });
        let state = SyncState::new(SyncConfig::default(), store.clone(), Arc::new(EmptySource));
        let key = SnapshotKey::new("u1", None);
        state.conversation_list.set_active_key(Some(key.clone()));

        let signing_out = tokio::spawn({
            let state = state.clone();
            async move { state.sign_out().await }
        });
        store.removing.notified().await;
        assert!(state.conversation_list.active_key().is_none());

        // The user's list query resolves while their snapshots are being removed
        let rendered = state.conversation_list.resolve(&key, Some(vec![chat(Uuid::new_v4())])).await;
        assert!(rendered.is_empty());
        assert!(state.conversation_list.last_fresh().is_none());

        store.gate.notify_one();
        signing_out.await.unwrap();
        state.conversation_list.set_active_key(Some(key.clone()));
        assert!(state.conversation_list.resolve(&key, None).await.is_empty());
    }

    #[tokio::test]
    async fn open_without_database_uses_memory_store() {
        let state = SyncState::open(SyncConfig::default(), Arc::new(EmptySource)).await.unwrap();
        let key = SnapshotKey::new("u1", None);
        state.conversation_list.set_active_key(Some(key.clone()));
        assert!(state.conversation_list.resolve(&key, None).await.is_empty());
    }
}
