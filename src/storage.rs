use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool};
use std::path::Path;

// Schema for the local cache database
const MIGRATIONS_SQL: &str = "
-- Key-value cache (list snapshots, panel preferences, ...)
CREATE TABLE IF NOT EXISTS kv_cache (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL, -- JSON document
    updated_at INTEGER NOT NULL -- Unix Timestamp (seconds)
);
";

// Best-effort local persistence, namespaced by logical cache key
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;
    async fn set_raw(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    /// Removes every key starting with `prefix`.
    async fn remove_prefix(&self, prefix: &str) -> Result<()>;
}

/// Reads and decodes a JSON value, falling back to `default` when the key is
/// missing, the store fails, or the stored document is malformed.
pub async fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str, default: T) -> T {
    let raw = match store.get_raw(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return default,
        Err(e) => {
            log::warn!("Failed to read cache key {}: {:?}", key, e);
            return default;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Discarding malformed cache entry {}: {}", key, e);
            default
        }
    }
}

pub async fn save_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).context("Failed to serialize cache value")?;
    store.set_raw(key, &raw).await
}

#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    /// Opens (creating if needed) the cache database at `db_path` and runs migrations.
    pub async fn open(db_path: &Path) -> Result<Self> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.context("Failed to create database directory")?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        log::info!("Connecting to cache database: {}", db_url);

        if !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            log::info!("Cache database not found, creating...");
            Sqlite::create_database(&db_url).await.context("Failed to create cache database")?;
        }

        let pool = SqlitePoolOptions::new()
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite cache database")?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database; a single connection keeps it alive.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite database")?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        log::debug!("Running cache database migrations...");
        sqlx::query(MIGRATIONS_SQL)
            .execute(pool)
            .await
            .context("Failed to run cache database migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read cache entry")?;

        match row {
            Some(row) => Ok(Some(row.try_get::<String, _>("value").context("Failed to decode cache value")?)),
            None => Ok(None),
        }
    }

    async fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_cache (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to write cache entry")?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .context("Failed to delete cache entry")?;
        Ok(())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM kv_cache WHERE substr(key, 1, length(?)) = ?")
            .bind(prefix)
            .bind(prefix)
            .execute(&self.pool)
            .await
            .context("Failed to delete cache entries by prefix")?;
        log::debug!("Removed {} cache entries under {}", result.rows_affected(), prefix);
        Ok(())
    }
}

// Process-local store for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: DashMap<String, String>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<()> {
        self.entries.retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}
