//! Stale-while-revalidate cache for the conversation list.
//!
//! The live list query passes through a "not resolved yet" state whenever the
//! session refreshes or the active profile changes. While it does, the list
//! renders the last fresh result for the current (user, profile) pair, then
//! the persisted snapshot for that pair, then nothing.

use crate::models::Conversation;
use crate::storage::{load_json, save_json, KeyValueStore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SNAPSHOT_KEY_PREFIX: &str = "conversation-list-snapshot";
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub user_id: String,
    // None is the user's default profile
    pub profile_id: Option<String>,
}

impl SnapshotKey {
    pub fn new(user_id: impl Into<String>, profile_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            profile_id,
        }
    }

    fn storage_key(&self) -> String {
        format!(
            "{}{}",
            user_prefix(&self.user_id),
            self.profile_id.as_deref().unwrap_or("default")
        )
    }
}

fn user_prefix(user_id: &str) -> String {
    format!("{}:v{}:{}:", SNAPSHOT_KEY_PREFIX, SNAPSHOT_VERSION, user_id)
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CachedConversationSnapshot {
    pub version: u32,
    pub key: SnapshotKey,
    pub conversations: Vec<Conversation>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Default)]
struct ListCacheInner {
    active: Option<SnapshotKey>,
    // Bumped on every key change; async reads compare it before committing
    generation: u64,
    last_fresh: Option<Arc<Vec<Conversation>>>,
    persisted: Option<Arc<Vec<Conversation>>>,
}

pub struct ListSnapshotCache {
    store: Arc<dyn KeyValueStore>,
    max_conversations: usize,
    inner: Mutex<ListCacheInner>,
}

impl ListSnapshotCache {
    pub fn new(store: Arc<dyn KeyValueStore>, max_conversations: usize) -> Self {
        Self {
            store,
            max_conversations,
            inner: Mutex::new(ListCacheInner::default()),
        }
    }

    pub fn active_key(&self) -> Option<SnapshotKey> {
        self.inner.lock().active.clone()
    }

    /// Switches the active (user, profile) pair. The in-memory holder is
    /// dropped right here, before any query for the new pair resolves.
    pub fn set_active_key(&self, key: Option<SnapshotKey>) {
        let mut inner = self.inner.lock();
        if inner.active == key {
            return;
        }
        log::info!("Conversation list key changed: {:?} -> {:?}", inner.active, key);
        inner.active = key;
        inner.generation = inner.generation.wrapping_add(1);
        inner.last_fresh = None;
        inner.persisted = None;
    }

    /// Last fresh result held in memory for the active pair.
    pub fn last_fresh(&self) -> Option<Arc<Vec<Conversation>>> {
        self.inner.lock().last_fresh.clone()
    }

    /// Turns the live query value into the list to render.
    ///
    /// `key` is the (user, profile) pair the query was issued for.
    /// `Some(list)` is a resolved result (possibly empty) and becomes the new
    /// holder and persisted snapshot. `None` means "not resolved yet".
    /// A result for a pair that is no longer active is dropped, and the
    /// active pair's fallback is rendered instead.
    pub async fn resolve(&self, key: &SnapshotKey, live: Option<Vec<Conversation>>) -> Arc<Vec<Conversation>> {
        match live {
            Some(conversations) => self.accept_fresh(key, conversations).await,
            None => self.fallback().await,
        }
    }

    async fn accept_fresh(&self, key: &SnapshotKey, conversations: Vec<Conversation>) -> Arc<Vec<Conversation>> {
        let conversations = Arc::new(conversations);
        let accepted = {
            let mut inner = self.inner.lock();
            if inner.active.as_ref() == Some(key) {
                inner.last_fresh = Some(Arc::clone(&conversations));
                inner.persisted = None;
                true
            } else {
                log::debug!(
                    "Dropping conversation list result for {:?}, active key is {:?}",
                    key,
                    inner.active
                );
                false
            }
        };
        if !accepted {
            return self.fallback().await;
        }

        let snapshot = CachedConversationSnapshot {
            version: SNAPSHOT_VERSION,
            key: key.clone(),
            conversations: conversations.iter().take(self.max_conversations).cloned().collect(),
            captured_at: Utc::now(),
        };
        let storage_key = key.storage_key();
        if let Err(e) = save_json(self.store.as_ref(), &storage_key, &snapshot).await {
            log::warn!("Failed to persist conversation list snapshot {}: {:?}", storage_key, e);
        }
        conversations
    }

    async fn fallback(&self) -> Arc<Vec<Conversation>> {
        let (key, generation) = {
            let inner = self.inner.lock();
            if let Some(fresh) = &inner.last_fresh {
                return Arc::clone(fresh);
            }
            if let Some(persisted) = &inner.persisted {
                return Arc::clone(persisted);
            }
            match &inner.active {
                Some(key) => (key.clone(), inner.generation),
                None => return Arc::default(),
            }
        };

        let storage_key = key.storage_key();
        let snapshot: Option<CachedConversationSnapshot> =
            load_json(self.store.as_ref(), &storage_key, None).await;
        let conversations = match snapshot {
            Some(s) if s.version == SNAPSHOT_VERSION && s.key == key => Arc::new(s.conversations),
            Some(_) => {
                log::warn!("Ignoring conversation list snapshot {} written for another key or version", storage_key);
                Arc::default()
            }
            None => Arc::default(),
        };

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            // Key switched while reading storage; this snapshot belongs to the old pair
            log::debug!("Discarding list snapshot for {:?}, active key changed", key);
            return Arc::default();
        }
        if let Some(fresh) = &inner.last_fresh {
            return Arc::clone(fresh);
        }
        inner.persisted = Some(Arc::clone(&conversations));
        conversations
    }

    /// Deletes every persisted snapshot of `user_id` (sign-out).
    pub async fn forget_user(&self, user_id: &str) {
        {
            let mut inner = self.inner.lock();
            if inner.active.as_ref().map_or(false, |k| k.user_id == user_id) {
                inner.last_fresh = None;
                inner.persisted = None;
            }
        }
        if let Err(e) = self.store.remove_prefix(&user_prefix(user_id)).await {
            log::warn!("Failed to remove list snapshots for user {}: {:?}", user_id, e);
        }
    }
}
