use super::{ContentStore, take_keys_after};
use crate::content::{ChannelConfig, Content, ContentKey, validate_channel_name};
use crate::error::{HubError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Table store on SQLite: one row per item, clustered by
/// `(channel, millis, hash)` so time range and pagination queries are index
/// scans in key order.
pub struct SqliteContentStore {
    db_path: PathBuf,
}

impl SqliteContentStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self { db_path };
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(&self) -> Result<()> {
        let conn = open(&self.db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS channels (
                name TEXT PRIMARY KEY,
                config TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS contents (
                channel TEXT NOT NULL,
                millis INTEGER NOT NULL,
                hash TEXT NOT NULL,
                data BLOB NOT NULL,
                content_type TEXT,
                content_language TEXT,
                user TEXT,
                expires_at INTEGER,
                PRIMARY KEY (channel, millis, hash)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_contents_expiry
             ON contents(channel, expires_at)",
            [],
        )?;

        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open(&db_path)?;
            f(&mut conn)
        })
        .await
        .map_err(|error| HubError::Internal(format!("sqlite task failed: {}", error)))?
    }
}

fn open(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn key_from_row(millis: i64, hash: String) -> Option<ContentKey> {
    DateTime::<Utc>::from_timestamp_millis(millis).map(|time| ContentKey::with_time(time, hash))
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    async fn write(&self, channel: &str, mut content: Content, ttl_days: u64) -> Result<ContentKey> {
        validate_channel_name(channel)?;
        let key = content.key_or_assign();
        let channel_name = channel.to_string();
        let stored_key = key.clone();

        let result = self
            .with_conn(move |conn| {
                let now = Utc::now().timestamp_millis();
                let expires_at = match i64::try_from(ttl_days) {
                    Ok(0) | Err(_) => None,
                    Ok(days) => Some(stored_key.millis().saturating_add(days.saturating_mul(MILLIS_PER_DAY))),
                };

                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR REPLACE INTO contents (
                        channel, millis, hash, data, content_type, content_language, user, expires_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        channel_name,
                        stored_key.millis(),
                        stored_key.hash(),
                        content.data().as_ref(),
                        content.content_type(),
                        content.content_language(),
                        content.user(),
                        expires_at,
                    ],
                )?;
                tx.execute(
                    "DELETE FROM contents
                     WHERE channel = ?1 AND expires_at IS NOT NULL AND expires_at < ?2",
                    params![channel_name, now],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => {
                tracing::debug!("Stored {} in sqlite channel {}", key, channel);
                Ok(key)
            }
            Err(error) => {
                tracing::warn!("unable to write channel {} key {}: {}", channel, key, error);
                Err(HubError::Backend(format!(
                    "sqlite write failed for {} {}: {}",
                    channel, key, error
                )))
            }
        }
    }

    async fn read(&self, channel: &str, key: &ContentKey) -> Option<Content> {
        let channel_name = channel.to_string();
        let lookup = key.clone();

        let result = self
            .with_conn(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT data, content_type, content_language, user
                         FROM contents WHERE channel = ?1 AND millis = ?2 AND hash = ?3",
                        params![channel_name, lookup.millis(), lookup.hash()],
                        |row| {
                            Ok((
                                row.get::<_, Vec<u8>>(0)?,
                                row.get::<_, Option<String>>(1)?,
                                row.get::<_, Option<String>>(2)?,
                                row.get::<_, Option<String>>(3)?,
                            ))
                        },
                    )
                    .optional()?;

                Ok(row.map(|(data, content_type, content_language, user)| {
                    let mut builder = Content::builder().key(lookup).data(data);
                    if let Some(content_type) = content_type {
                        builder = builder.content_type(content_type);
                    }
                    if let Some(content_language) = content_language {
                        builder = builder.content_language(content_language);
                    }
                    if let Some(user) = user {
                        builder = builder.user(user);
                    }
                    builder.build()
                }))
            })
            .await;

        result.unwrap_or_else(|error| {
            tracing::warn!("unable to read channel {} key {}: {}", channel, key, error);
            None
        })
    }

    async fn list_keys_by_time_range(
        &self,
        channel: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BTreeSet<ContentKey> {
        tracing::debug!("starting query {} {} {}", channel, start, end);
        let channel_name = channel.to_string();

        let result = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT millis, hash FROM contents
                     WHERE channel = ?1 AND millis >= ?2 AND millis <= ?3
                     ORDER BY millis, hash",
                )?;
                let rows = stmt.query_map(
                    params![channel_name, start.timestamp_millis(), end.timestamp_millis()],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                )?;

                let mut keys = BTreeSet::new();
                for row in rows {
                    let (millis, hash) = row?;
                    if let Some(key) = key_from_row(millis, hash) {
                        keys.insert(key);
                    }
                }
                Ok(keys)
            })
            .await;

        match result {
            Ok(keys) => {
                tracing::debug!("found {} for {} {} {}", keys.len(), channel, start, end);
                keys
            }
            Err(error) => {
                tracing::warn!("query fail {} {} {}: {}", channel, start, end, error);
                BTreeSet::new()
            }
        }
    }

    async fn list_keys_after(
        &self,
        channel: &str,
        key: &ContentKey,
        count: usize,
    ) -> Vec<ContentKey> {
        let channel_name = channel.to_string();
        let after = key.clone();
        let limit = i64::try_from(count).unwrap_or(i64::MAX);

        let result = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT millis, hash FROM contents
                     WHERE channel = ?1 AND (millis > ?2 OR (millis = ?2 AND hash > ?3))
                     ORDER BY millis, hash
                     LIMIT ?4",
                )?;
                let rows = stmt.query_map(
                    params![channel_name, after.millis(), after.hash(), limit],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                )?;

                let mut keys = Vec::new();
                for row in rows {
                    let (millis, hash) = row?;
                    if let Some(key) = key_from_row(millis, hash) {
                        keys.push(key);
                    }
                }
                Ok(keys)
            })
            .await;

        match result {
            Ok(candidates) => {
                let keys = take_keys_after(candidates, key, count);
                tracing::debug!("found {} for {} {} {}", keys.len(), channel, key, count);
                keys
            }
            Err(error) => {
                tracing::warn!("query fail {} {} {}: {}", channel, key, count, error);
                Vec::new()
            }
        }
    }

    async fn last_key(&self, channel: &str) -> Option<ContentKey> {
        let channel_name = channel.to_string();
        let result = self
            .with_conn(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT millis, hash FROM contents
                         WHERE channel = ?1
                         ORDER BY millis DESC, hash DESC
                         LIMIT 1",
                        [channel_name],
                        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                    )
                    .optional()?;
                Ok(row.and_then(|(millis, hash)| key_from_row(millis, hash)))
            })
            .await;

        result.unwrap_or_else(|error| {
            tracing::warn!("unable to find last key of {}: {}", channel, error);
            None
        })
    }

    async fn initialize_channel(&self, config: &ChannelConfig) -> Result<()> {
        validate_channel_name(&config.name)?;
        let name = config.name.clone();
        let config_json = serde_json::to_string(config)?;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO channels (name, config, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET config = excluded.config",
                params![name, config_json, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn channel_exists(&self, channel: &str) -> bool {
        let name = channel.to_string();
        let result = self
            .with_conn(move |conn| {
                let found: Option<i64> = conn
                    .query_row("SELECT 1 FROM channels WHERE name = ?1", [name], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(found.is_some())
            })
            .await;

        result.unwrap_or_else(|error| {
            tracing::warn!("unable to check channel {}: {}", channel, error);
            false
        })
    }

    async fn delete(&self, channel: &str) {
        let name = channel.to_string();
        let result = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let removed = tx.execute("DELETE FROM contents WHERE channel = ?1", [&name])?;
                tx.execute("DELETE FROM channels WHERE name = ?1", [&name])?;
                tx.commit()?;
                Ok(removed)
            })
            .await;

        match result {
            Ok(removed) => tracing::info!("Deleted sqlite channel {} ({} items)", channel, removed),
            Err(error) => tracing::warn!("unable to delete channel {}: {}", channel, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contract;

    #[tokio::test]
    async fn test_sqlite_store_contract() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SqliteContentStore::new(temp_dir.path().join("hub.db")).unwrap();
        contract::all(&store).await;
        contract::expired_write_is_not_kept(&store).await;
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("hub.db");

        let key = {
            let store = SqliteContentStore::new(&path).unwrap();
            store
                .initialize_channel(&ChannelConfig::new("durable"))
                .await
                .unwrap();
            store
                .write("durable", Content::builder().data("kept").build(), 0)
                .await
                .unwrap()
        };

        let reopened = SqliteContentStore::new(&path).unwrap();
        assert!(reopened.channel_exists("durable").await);
        let content = reopened.read("durable", &key).await.unwrap();
        assert_eq!(content.data().as_ref(), b"kept");
    }

    #[tokio::test]
    async fn test_expired_rows_are_removed_on_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SqliteContentStore::new(temp_dir.path().join("hub.db")).unwrap();

        let old = ContentKey::with_time(Utc::now() - chrono::Duration::days(3), "old");
        store
            .write("ttl", Content::builder().key(old.clone()).build(), 1)
            .await
            .unwrap();
        store
            .write("ttl", Content::builder().data("new").build(), 1)
            .await
            .unwrap();

        assert!(store.read("ttl", &old).await.is_none());
    }

    #[tokio::test]
    async fn test_write_failure_is_surfaced() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("hub.db");
        let store = SqliteContentStore::new(&path).unwrap();
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("DROP TABLE contents", []).unwrap();
        }

        let result = store
            .write("broken", Content::builder().data("x").build(), 0)
            .await;
        assert!(matches!(result, Err(HubError::Backend(_))));

        let range = store
            .list_keys_by_time_range("broken", Utc::now() - chrono::Duration::hours(1), Utc::now())
            .await;
        assert!(range.is_empty());
    }
}
