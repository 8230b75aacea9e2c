use super::{ContentStore, take_keys_after};
use crate::content::{ChannelConfig, Content, ContentKey, validate_channel_name};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct ChannelItems {
    config: Option<ChannelConfig>,
    items: BTreeMap<ContentKey, Content>,
}

/// Lowest key still inside a retention of `ttl_days`, `None` when unlimited.
fn retention_floor(ttl_days: u64) -> Option<ContentKey> {
    if ttl_days == 0 {
        return None;
    }
    let days = i64::try_from(ttl_days).ok()?;
    let cutoff = Utc::now() - chrono::Duration::days(days.min(365 * 1000));
    Some(ContentKey::with_time(cutoff, ""))
}

impl ChannelItems {
    /// Drops items older than `floor`.
    fn trim(&mut self, floor: &ContentKey) {
        self.items = self.items.split_off(floor);
    }
}

/// In-memory cache tier. Items live in one ordered map per channel and are
/// trimmed to the channel retention on every write.
#[derive(Default)]
pub struct MemoryContentStore {
    channels: RwLock<HashMap<String, ChannelItems>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn item_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|entry| entry.items.len())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn write(&self, channel: &str, mut content: Content, ttl_days: u64) -> Result<ContentKey> {
        validate_channel_name(channel)?;
        let key = content.key_or_assign();

        let floor = retention_floor(ttl_days);
        let mut channels = self.channels.write().await;
        let entry = channels.entry(channel.to_string()).or_default();
        if let Some(floor) = &floor {
            entry.trim(floor);
            if key < *floor {
                tracing::debug!("Skipped expired {} in memory channel {}", key, channel);
                return Ok(key);
            }
        }
        entry.items.insert(key.clone(), content);

        tracing::debug!("Stored {} in memory channel {}", key, channel);
        Ok(key)
    }

    async fn read(&self, channel: &str, key: &ContentKey) -> Option<Content> {
        self.channels
            .read()
            .await
            .get(channel)
            .and_then(|entry| entry.items.get(key))
            .cloned()
    }

    async fn list_keys_by_time_range(
        &self,
        channel: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BTreeSet<ContentKey> {
        let channels = self.channels.read().await;
        let Some(entry) = channels.get(channel) else {
            return BTreeSet::new();
        };
        entry
            .items
            .range(ContentKey::with_time(start, "")..)
            .map(|(key, _)| key)
            .take_while(|key| key.time() <= end)
            .cloned()
            .collect()
    }

    async fn list_keys_after(
        &self,
        channel: &str,
        key: &ContentKey,
        count: usize,
    ) -> Vec<ContentKey> {
        let channels = self.channels.read().await;
        let Some(entry) = channels.get(channel) else {
            return Vec::new();
        };
        let candidates = entry.items.range(key.clone()..).map(|(key, _)| key.clone());
        take_keys_after(candidates, key, count)
    }

    async fn last_key(&self, channel: &str) -> Option<ContentKey> {
        self.channels
            .read()
            .await
            .get(channel)
            .and_then(|entry| entry.items.keys().next_back().cloned())
    }

    async fn initialize_channel(&self, config: &ChannelConfig) -> Result<()> {
        validate_channel_name(&config.name)?;
        let mut channels = self.channels.write().await;
        channels.entry(config.name.clone()).or_default().config = Some(config.clone());
        Ok(())
    }

    async fn channel_exists(&self, channel: &str) -> bool {
        self.channels
            .read()
            .await
            .get(channel)
            .is_some_and(|entry| entry.config.is_some())
    }

    async fn delete(&self, channel: &str) {
        if self.channels.write().await.remove(channel).is_some() {
            tracing::info!("Deleted memory channel {}", channel);
        }
    }
}
