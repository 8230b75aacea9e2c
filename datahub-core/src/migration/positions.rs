use super::SEQUENCE_START;
use crate::content::ContentKey;
use crate::{HubError, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Last peer sequence copied into a local channel and the key it was stored
/// under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPosition {
    pub sequence: u64,
    pub key: ContentKey,
}

impl MigrationPosition {
    pub fn new(sequence: u64, key: ContentKey) -> Self {
        Self { sequence, key }
    }

    /// Position recorded for a channel that has nothing migrated yet.
    pub fn start() -> Self {
        Self::new(SEQUENCE_START, ContentKey::sentinel_start())
    }

    pub fn is_start(&self) -> bool {
        self.sequence == SEQUENCE_START || self.key.is_sentinel()
    }
}

/// Coordination-store bookkeeping of migration progress per channel.
#[async_trait]
pub trait MigrationPositions: Send + Sync {
    async fn last_position(&self, channel: &str) -> Result<Option<MigrationPosition>>;

    async fn record(&self, channel: &str, position: &MigrationPosition) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryMigrationPositions {
    positions: RwLock<HashMap<String, MigrationPosition>>,
}

impl MemoryMigrationPositions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MigrationPositions for MemoryMigrationPositions {
    async fn last_position(&self, channel: &str) -> Result<Option<MigrationPosition>> {
        Ok(self.positions.read().await.get(channel).cloned())
    }

    async fn record(&self, channel: &str, position: &MigrationPosition) -> Result<()> {
        self.positions
            .write()
            .await
            .insert(channel.to_string(), position.clone());
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredPosition {
    sequence: u64,
    key: String,
}

impl From<&MigrationPosition> for StoredPosition {
    fn from(position: &MigrationPosition) -> Self {
        Self {
            sequence: position.sequence,
            key: position.key.to_zk(),
        }
    }
}

impl TryFrom<StoredPosition> for MigrationPosition {
    type Error = HubError;

    fn try_from(stored: StoredPosition) -> Result<Self> {
        let key = ContentKey::from_zk(&stored.key)
            .ok_or_else(|| HubError::MalformedKey(stored.key.clone()))?;
        Ok(MigrationPosition::new(stored.sequence, key))
    }
}

/// Positions kept in one Redis hash per namespace, one field per channel.
#[derive(Clone)]
pub struct RedisMigrationPositions {
    conn: ConnectionManager,
    hash_key: String,
}

impl RedisMigrationPositions {
    pub async fn new(url: &str, namespace: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|error| HubError::Config(format!("invalid redis url {}: {}", url, error)))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            hash_key: format!("{}:migration:positions", namespace),
        })
    }
}

#[async_trait]
impl MigrationPositions for RedisMigrationPositions {
    async fn last_position(&self, channel: &str) -> Result<Option<MigrationPosition>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(&self.hash_key, channel).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let stored: StoredPosition = serde_json::from_str(&raw)?;
        match MigrationPosition::try_from(stored) {
            Ok(position) => Ok(Some(position)),
            Err(error) => {
                tracing::warn!("Ignoring migration position for {}: {}", channel, error);
                Ok(None)
            }
        }
    }

    async fn record(&self, channel: &str, position: &MigrationPosition) -> Result<()> {
        let payload = serde_json::to_string(&StoredPosition::from(position))?;
        let mut conn = self.conn.clone();
        let _: () = conn.hset(&self.hash_key, channel, payload).await?;
        Ok(())
    }
}
