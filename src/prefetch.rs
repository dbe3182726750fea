//! Intent-driven prefetch of conversation detail data.
//!
//! Per conversation: `not cached -> prefetching -> cached -> active -> cleared`,
//! and `cached -> expired -> not cached` once the TTL elapses. A conversation
//! the user has opened is "active": its live query is the source of truth, so
//! no prefetch result is ever written over it. The active flag is checked when
//! the debounce fires and again right before a fetched result is stored.
//! Invalidation (`clear_entry`, `clear_all`) bumps a generation, and a result
//! fetched under an older generation is dropped the same way.

use crate::models::{ConversationAccess, ConversationDetail, LastUsedModel, Message};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

// One-shot reads backing the conversation detail screen
#[async_trait]
pub trait ConversationDetailSource: Send + Sync {
    async fn fetch_access(&self, conversation_id: Uuid) -> Result<ConversationAccess>;
    async fn fetch_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>>;
    async fn fetch_last_used_model(&self, conversation_id: Uuid) -> Result<Option<LastUsedModel>>;
    async fn fetch_streaming_status(&self, conversation_id: Uuid) -> Result<bool>;
}

/// Issues the four detail reads concurrently.
pub async fn fetch_conversation_detail(
    source: &dyn ConversationDetailSource,
    conversation_id: Uuid,
) -> Result<ConversationDetail> {
    let (access, messages, last_used_model, is_streaming) = futures::try_join!(
        source.fetch_access(conversation_id),
        source.fetch_messages(conversation_id),
        source.fetch_last_used_model(conversation_id),
        source.fetch_streaming_status(conversation_id),
    )?;
    Ok(ConversationDetail {
        access,
        messages,
        last_used_model,
        is_streaming,
    })
}

#[derive(Clone, Debug)]
pub struct PreloadedConversationEntry {
    pub conversation_id: Uuid,
    pub payload: Arc<ConversationDetail>,
    pub captured_at: Instant,
    pub is_active: bool,
}

// (cache epoch, conversation generation) a fetch was started under
type FetchToken = (u64, u64);

struct PrefetchInner {
    source: Arc<dyn ConversationDetailSource>,
    debounce: Duration,
    ttl: Duration,
    entries: DashMap<Uuid, PreloadedConversationEntry>,
    // Ids already prefetched; suppresses repeated intent signals
    prefetched: DashSet<Uuid>,
    in_flight: DashMap<Uuid, FetchToken>,
    active: DashSet<Uuid>,
    timers: DashMap<Uuid, JoinHandle<()>>,
    // Bumped by clear_all
    epoch: AtomicU64,
    // Bumped by clear_entry / release_active
    generations: DashMap<Uuid, u64>,
}

impl PrefetchInner {
    fn is_active(&self, conversation_id: &Uuid) -> bool {
        self.active.contains(conversation_id)
            || self.entries.get(conversation_id).map_or(false, |e| e.is_active)
    }

    fn token(&self, conversation_id: &Uuid) -> FetchToken {
        let generation = self.generations.get(conversation_id).map_or(0, |g| *g);
        (self.epoch.load(Ordering::SeqCst), generation)
    }

    fn invalidate(&self, conversation_id: Uuid) {
        *self.generations.entry(conversation_id).or_insert(0) += 1;
        self.in_flight.remove(&conversation_id);
    }

    // Removes the entry if its TTL has elapsed; returns the live entry otherwise
    fn live_entry(&self, conversation_id: &Uuid) -> Option<PreloadedConversationEntry> {
        let entry = self.entries.get(conversation_id)?.value().clone();
        if self.is_expired(&entry, Instant::now()) {
            log::debug!("Prefetched detail for {} expired", conversation_id);
            self.entries.remove(conversation_id);
            self.prefetched.remove(conversation_id);
            return None;
        }
        Some(entry)
    }

    fn abort_timers(&self) {
        self.timers.iter().for_each(|timer| timer.value().abort());
        self.timers.clear();
    }

    // Runs once the debounce delay has elapsed
    fn start_fetch(self: Arc<Self>, conversation_id: Uuid) {
        self.timers.remove(&conversation_id);
        if self.is_active(&conversation_id) {
            log::debug!("Skipping prefetch for {}: conversation became active", conversation_id);
            return;
        }
        if self.prefetched.contains(&conversation_id) {
            return;
        }
        let token = self.token(&conversation_id);
        match self.in_flight.entry(conversation_id) {
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => {
                slot.insert(token);
            }
        }

        let source = Arc::clone(&self.source);
        let cache = Arc::downgrade(&self);
        drop(self);

        // Detached from the debounce timer so a reset can never cancel a fetch midway
        tokio::spawn(async move {
            log::debug!("Prefetching conversation {}", conversation_id);
            let result = fetch_conversation_detail(source.as_ref(), conversation_id).await;
            let Some(cache) = cache.upgrade() else {
                return;
            };
            cache.in_flight.remove_if(&conversation_id, |_, current| *current == token);
            match result {
                Ok(detail) => cache.commit(conversation_id, token, detail),
                Err(e) => {
                    log::warn!("Prefetch failed for conversation {}: {:?}", conversation_id, e);
                }
            }
        });
    }

    fn commit(&self, conversation_id: Uuid, token: FetchToken, detail: ConversationDetail) {
        if self.is_active(&conversation_id) {
            log::debug!(
                "Discarding prefetch result for {}: conversation became active while fetching",
                conversation_id
            );
            return;
        }
        if self.token(&conversation_id) != token {
            log::debug!(
                "Discarding prefetch result for {}: cache was invalidated while fetching",
                conversation_id
            );
            return;
        }
        self.entries.insert(
            conversation_id,
            PreloadedConversationEntry {
                conversation_id,
                payload: Arc::new(detail),
                captured_at: Instant::now(),
                is_active: false,
            },
        );
        self.prefetched.insert(conversation_id);
        // An invalidation that raced the insert wins
        if self.token(&conversation_id) != token {
            self.entries.remove(&conversation_id);
            self.prefetched.remove(&conversation_id);
        }
    }

    fn is_expired(&self, entry: &PreloadedConversationEntry, now: Instant) -> bool {
        !entry.is_active && now.saturating_duration_since(entry.captured_at) > self.ttl
    }
}

impl Drop for PrefetchInner {
    fn drop(&mut self) {
        self.abort_timers();
    }
}

/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct DetailPrefetchCache {
    inner: Arc<PrefetchInner>,
}

impl DetailPrefetchCache {
    pub fn new(source: Arc<dyn ConversationDetailSource>, debounce: Duration, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(PrefetchInner {
                source,
                debounce,
                ttl,
                entries: DashMap::new(),
                prefetched: DashSet::new(),
                in_flight: DashMap::new(),
                active: DashSet::new(),
                timers: DashMap::new(),
                epoch: AtomicU64::new(0),
                generations: DashMap::new(),
            }),
        }
    }

    /// Intent signal (hover, focus). Starts or restarts the debounce timer
    /// unless the conversation is active, already prefetched or in flight.
    /// An expired entry is evicted first, so it no longer counts as prefetched.
    ///
    /// Must be called from within a tokio runtime.
    pub fn prefetch_on_intent(&self, conversation_id: Uuid) {
        let inner = &self.inner;
        inner.live_entry(&conversation_id);
        if inner.is_active(&conversation_id)
            || inner.prefetched.contains(&conversation_id)
            || inner.in_flight.contains_key(&conversation_id)
        {
            return;
        }

        let weak: Weak<PrefetchInner> = Arc::downgrade(inner);
        let delay = inner.debounce;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.start_fetch(conversation_id);
            }
        });
        if let Some(previous) = inner.timers.insert(conversation_id, timer) {
            previous.abort();
        }
    }

    /// The user navigated into the conversation.
    pub fn mark_active(&self, conversation_id: Uuid) {
        let inner = &self.inner;
        inner.active.insert(conversation_id);
        if let Some(mut entry) = inner.entries.get_mut(&conversation_id) {
            entry.is_active = true;
            entry.captured_at = Instant::now();
        }
        inner.prefetched.remove(&conversation_id);
        if let Some((_, timer)) = inner.timers.remove(&conversation_id) {
            timer.abort();
        }
    }

    /// The user navigated away: the active flag and the entry both go.
    pub fn release_active(&self, conversation_id: Uuid) {
        self.inner.active.remove(&conversation_id);
        self.clear_entry(conversation_id);
    }

    pub fn is_active(&self, conversation_id: Uuid) -> bool {
        self.inner.is_active(&conversation_id)
    }

    pub fn is_in_flight(&self, conversation_id: Uuid) -> bool {
        self.inner.in_flight.contains_key(&conversation_id)
    }

    /// Returns the entry while it is within the TTL (active entries never
    /// expire); an expired entry is removed and reported as a miss.
    pub fn get_cached_data(&self, conversation_id: Uuid) -> Option<PreloadedConversationEntry> {
        self.inner.live_entry(&conversation_id)
    }

    /// Direct, uncached fetch used when navigation finds no usable entry.
    pub async fn fetch_detail(&self, conversation_id: Uuid) -> Result<Arc<ConversationDetail>> {
        let detail = fetch_conversation_detail(self.inner.source.as_ref(), conversation_id).await?;
        Ok(Arc::new(detail))
    }

    /// Cached payload if usable, otherwise a direct fetch.
    pub async fn load_detail(&self, conversation_id: Uuid) -> Result<Arc<ConversationDetail>> {
        match self.get_cached_data(conversation_id) {
            Some(entry) => Ok(entry.payload),
            None => self.fetch_detail(conversation_id).await,
        }
    }

    /// Drops every expired entry; returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let inner = &self.inner;
        let now = Instant::now();
        let mut expired = Vec::new();
        inner.entries.retain(|id, entry| {
            let keep = !inner.is_expired(entry, now);
            if !keep {
                expired.push(*id);
            }
            keep
        });
        for id in &expired {
            inner.prefetched.remove(id);
        }
        expired.len()
    }

    /// Drops the entry and any result still being fetched for it.
    pub fn clear_entry(&self, conversation_id: Uuid) {
        let inner = &self.inner;
        inner.invalidate(conversation_id);
        inner.entries.remove(&conversation_id);
        inner.prefetched.remove(&conversation_id);
        if let Some((_, timer)) = inner.timers.remove(&conversation_id) {
            timer.abort();
        }
    }

    pub fn clear_all(&self) {
        log::info!("Clearing conversation prefetch cache");
        let inner = &self.inner;
        inner.epoch.fetch_add(1, Ordering::SeqCst);
        inner.abort_timers();
        inner.in_flight.clear();
        inner.generations.clear();
        inner.entries.clear();
        inner.prefetched.clear();
        inner.active.clear();
    }

    /// Cancels pending debounce timers. In-flight fetches finish but their
    /// results are dropped once the cache itself is gone.
    pub fn shutdown(&self) {
        self.inner.abort_timers();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}
