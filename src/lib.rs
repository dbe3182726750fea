//! Client-side state synchronization for a streaming chat app.
//!
//! Reconciles what the user watches stream in (overlays) with what the
//! backend has persisted, keeps unsent drafts per conversation, and caches the
//! conversation list and conversation details without flicker or cross-talk.

// Declare the modules
pub mod commands;
pub mod config;
pub mod draft;
pub mod events;
pub mod list_cache;
pub mod models;
pub mod observable;
pub mod overlay;
pub mod prefetch;
pub mod reconcile;
pub mod state;
pub mod storage;

pub use config::SyncConfig;
pub use draft::{DraftPatch, DraftScope, DraftState, DraftStore};
pub use events::StreamEvent;
pub use list_cache::{ListSnapshotCache, SnapshotKey};
pub use overlay::{OverlayStore, StreamOverlay};
pub use prefetch::{ConversationDetailSource, DetailPrefetchCache, PreloadedConversationEntry};
pub use reconcile::{reconcile, MessageReconciler};
pub use state::SyncState;
pub use storage::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};

/// Installs the `env_logger` backend (default filter `info`, `RUST_LOG`
/// overrides). Safe to call more than once.
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}
