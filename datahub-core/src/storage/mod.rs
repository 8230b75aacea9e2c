//! Storage backends for Datahub
//!
//! Every backend implements [`ContentStore`], the single channel-data API of
//! the engine. Writes surface failures; reads and range queries degrade to an
//! empty result and log the backend error.

pub mod factory;
pub mod memory_store;
pub mod object_content_store;
pub mod sqlite_store;

pub use factory::ContentStoreBuilder;
pub use memory_store::MemoryContentStore;
pub use object_content_store::ObjectContentStore;
pub use sqlite_store::SqliteContentStore;

use crate::content::{ChannelConfig, Content, ContentKey};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Width of the search window of [`ContentStore::list_keys_after`].
pub const KEYS_AFTER_WINDOW_MILLIS: i64 = 24 * 60 * 60 * 1000;

const LAST_KEY_PAGE: usize = 1_000;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Persists `content` and returns its key. New content gets a fresh key;
    /// content that already has one is stored under that key. Backends that
    /// enforce retention drop content already older than `ttl_days`; its key
    /// is still returned.
    async fn write(&self, channel: &str, content: Content, ttl_days: u64) -> Result<ContentKey>;

    /// Returns the item with all metadata present at write time.
    async fn read(&self, channel: &str, key: &ContentKey) -> Option<Content>;

    /// Keys with `start <= time <= end`, ascending.
    async fn list_keys_by_time_range(
        &self,
        channel: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BTreeSet<ContentKey>;

    /// Up to `count` keys strictly after `key`, ascending. The result stops at
    /// [`KEYS_AFTER_WINDOW_MILLIS`] past the first key found, so a page never
    /// spans more than one day of the channel.
    async fn list_keys_after(&self, channel: &str, key: &ContentKey, count: usize)
    -> Vec<ContentKey>;

    /// Greatest key stored in `channel`.
    ///
    /// The default walks the channel page by page; backends with an ordered
    /// index answer directly.
    async fn last_key(&self, channel: &str) -> Option<ContentKey> {
        let mut last = None;
        let mut cursor = ContentKey::sentinel_start();
        loop {
            let page = self.list_keys_after(channel, &cursor, LAST_KEY_PAGE).await;
            match page.last() {
                Some(key) => {
                    cursor = key.clone();
                    last = Some(key.clone());
                }
                None => return last,
            }
        }
    }

    /// Prepares backend structures for a channel. Idempotent.
    async fn initialize_channel(&self, config: &ChannelConfig) -> Result<()>;

    async fn channel_exists(&self, channel: &str) -> bool;

    /// Removes every item and structure of a channel, logging partial failures.
    async fn delete(&self, channel: &str);

    fn resolve_key(&self, id: &str) -> Option<ContentKey> {
        ContentKey::from_url(id)
    }
}

pub type DynContentStore = Arc<dyn ContentStore>;

/// Applies the `list_keys_after` contract to an ascending candidate list.
pub(crate) fn take_keys_after(
    candidates: impl IntoIterator<Item = ContentKey>,
    key: &ContentKey,
    count: usize,
) -> Vec<ContentKey> {
    let mut after = candidates.into_iter().filter(|candidate| candidate > key);
    let Some(first) = after.next() else {
        return Vec::new();
    };
    let window_end = first.time() + chrono::Duration::milliseconds(KEYS_AFTER_WINDOW_MILLIS);
    std::iter::once(first)
        .chain(after.take_while(|candidate| candidate.time() <= window_end))
        .take(count)
        .collect()
}
