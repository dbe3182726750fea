use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PREFETCH_DEBOUNCE: Duration = Duration::from_millis(150);
pub const DEFAULT_PREFETCH_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_SNAPSHOT_CONVERSATIONS: usize = 200;

const ENV_PREFETCH_DEBOUNCE_MS: &str = "CHATSYNC_PREFETCH_DEBOUNCE_MS";
const ENV_PREFETCH_TTL_SECS: &str = "CHATSYNC_PREFETCH_TTL_SECS";
const ENV_SNAPSHOT_DB: &str = "CHATSYNC_SNAPSHOT_DB";
const ENV_MAX_SNAPSHOT_CONVERSATIONS: &str = "CHATSYNC_MAX_SNAPSHOT_CONVERSATIONS";

/// Tunables for the sync layer.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncConfig {
    pub prefetch_debounce: Duration,
    pub prefetch_ttl: Duration,
    // None keeps list snapshots in memory only
    pub snapshot_db_path: Option<PathBuf>,
    pub max_snapshot_conversations: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            prefetch_debounce: DEFAULT_PREFETCH_DEBOUNCE,
            prefetch_ttl: DEFAULT_PREFETCH_TTL,
            snapshot_db_path: None,
            max_snapshot_conversations: DEFAULT_MAX_SNAPSHOT_CONVERSATIONS,
        }
    }
}

impl SyncConfig {
    /// Reads overrides from the process environment. Invalid values are
    /// logged and replaced by the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let debounce_ms = parse_var(&lookup, ENV_PREFETCH_DEBOUNCE_MS, defaults.prefetch_debounce.as_millis() as u64);
        let ttl_secs = parse_var(&lookup, ENV_PREFETCH_TTL_SECS, defaults.prefetch_ttl.as_secs());
        let max_snapshot_conversations =
            parse_var(&lookup, ENV_MAX_SNAPSHOT_CONVERSATIONS, defaults.max_snapshot_conversations);
        let snapshot_db_path = lookup(ENV_SNAPSHOT_DB)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        Self {
            prefetch_debounce: Duration::from_millis(debounce_ms),
            prefetch_ttl: Duration::from_secs(ttl_secs),
            snapshot_db_path,
            max_snapshot_conversations,
        }
    }
}

fn parse_var<T, F>(lookup: &F, name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => {
            log::debug!("Using {}={} from environment", name, value);
            value
        }
        Err(e) => {
            log::warn!("Ignoring invalid value for {} ({:?}): {}. Using default {}", name, raw, e, default);
            default
        }
    }
}
