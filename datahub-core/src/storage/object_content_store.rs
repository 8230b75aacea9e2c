use super::{ContentStore, take_keys_after};
use crate::content::{ChannelConfig, Content, ContentKey, validate_channel_name};
use crate::error::{HubError, Result};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutPayload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

const CHANNEL_MARKER: &str = "_channel.json";
const HEADER_LEN_BYTES: usize = 4;
/// Time segments of the URL form (year through millisecond).
const TIME_SEGMENTS: usize = 7;

/// Metadata framed in front of the payload of every item object.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ItemHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<String>,
}

/// Object store backend: one object per item at `{channel}/{key url form}`.
///
/// Because the URL form is zero padded, object names sort in key order, which
/// lets pagination use offset listings. Retention is left to bucket lifecycle
/// rules; `ttl_days` is not enforced here.
pub struct ObjectContentStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectContentStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// S3 bucket store. Credentials come from the standard AWS environment.
    pub fn s3(bucket: &str, region: &str, endpoint: Option<&str>) -> Result<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(region);
        if let Some(endpoint) = endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }
        let store = builder.build()?;
        Ok(Self::new(Arc::new(store)))
    }

    fn item_path(channel: &str, key: &ContentKey) -> Path {
        Path::from(format!("{}/{}", channel, key.to_url()))
    }

    fn marker_path(channel: &str) -> Path {
        Path::from(format!("{}/{}", channel, CHANNEL_MARKER))
    }

    async fn list_prefix(&self, prefix: &Path) -> Result<Vec<ObjectMeta>> {
        Ok(self.store.list(Some(prefix)).try_collect().await?)
    }

    async fn read_item(&self, channel: &str, key: &ContentKey) -> Result<Option<Content>> {
        let path = Self::item_path(channel, key);
        let body = match self.store.get(&path).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        decode_item(key.clone(), body).map(Some)
    }
}

fn encode_item(content: &Content) -> Result<Bytes> {
    let header = ItemHeader {
        content_type: content.content_type().map(str::to_string),
        content_language: content.content_language().map(str::to_string),
        user: content.user().map(str::to_string),
    };
    let header = serde_json::to_vec(&header)?;
    let header_len = u32::try_from(header.len())
        .map_err(|_| HubError::Internal("item header too large".to_string()))?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN_BYTES + header.len() + content.data().len());
    buf.put_u32(header_len);
    buf.put_slice(&header);
    buf.put_slice(content.data());
    Ok(buf.freeze())
}

fn decode_item(key: ContentKey, body: Bytes) -> Result<Content> {
    if body.len() < HEADER_LEN_BYTES {
        return Err(HubError::Backend(format!("truncated item {}", key)));
    }
    let mut len_bytes = [0u8; HEADER_LEN_BYTES];
    len_bytes.copy_from_slice(&body[..HEADER_LEN_BYTES]);
    let header_end = HEADER_LEN_BYTES + u32::from_be_bytes(len_bytes) as usize;
    if body.len() < header_end {
        return Err(HubError::Backend(format!("truncated item header {}", key)));
    }

    let header: ItemHeader = serde_json::from_slice(&body[HEADER_LEN_BYTES..header_end])?;
    let mut builder = Content::builder().key(key).data(body.slice(header_end..));
    if let Some(content_type) = header.content_type {
        builder = builder.content_type(content_type);
    }
    if let Some(content_language) = header.content_language {
        builder = builder.content_language(content_language);
    }
    if let Some(user) = header.user {
        builder = builder.user(user);
    }
    Ok(builder.build())
}

fn key_from_location(channel: &str, location: &Path) -> Option<ContentKey> {
    let name = location.as_ref().strip_prefix(channel)?.strip_prefix('/')?;
    if name == CHANNEL_MARKER {
        return None;
    }
    ContentKey::from_url(name)
}

/// Deepest shared time prefix of two instants, e.g. `2015/01/23` when both
/// fall on the same day.
fn common_time_prefix(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let start_url = ContentKey::with_time(start, "").to_url();
    let end_url = ContentKey::with_time(end, "").to_url();
    start_url
        .split('/')
        .zip(end_url.split('/'))
        .take(TIME_SEGMENTS)
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a)
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl ContentStore for ObjectContentStore {
    async fn write(&self, channel: &str, mut content: Content, _ttl_days: u64) -> Result<ContentKey> {
        validate_channel_name(channel)?;
        let key = content.key_or_assign();
        let body = encode_item(&content)?;

        let path = Self::item_path(channel, &key);
        match self.store.put(&path, PutPayload::from(body)).await {
            Ok(_) => {
                tracing::debug!("Stored object {}", path);
                Ok(key)
            }
            Err(error) => {
                tracing::warn!("unable to write channel {} key {}: {}", channel, key, error);
                Err(HubError::Backend(format!(
                    "object write failed for {} {}: {}",
                    channel, key, error
                )))
            }
        }
    }

    async fn read(&self, channel: &str, key: &ContentKey) -> Option<Content> {
        match self.read_item(channel, key).await {
            Ok(content) => content,
            Err(error) => {
                tracing::warn!("unable to read channel {} key {}: {}", channel, key, error);
                None
            }
        }
    }

    async fn list_keys_by_time_range(
        &self,
        channel: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BTreeSet<ContentKey> {
        tracing::debug!("starting query {} {} {}", channel, start, end);
        let time_prefix = common_time_prefix(start, end);
        let prefix = if time_prefix.is_empty() {
            Path::from(channel)
        } else {
            Path::from(format!("{}/{}", channel, time_prefix))
        };

        match self.list_prefix(&prefix).await {
            Ok(objects) => {
                let keys: BTreeSet<ContentKey> = objects
                    .iter()
                    .filter_map(|meta| key_from_location(channel, &meta.location))
                    .filter(|key| key.time() >= start && key.time() <= end)
                    .collect();
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
        let prefix = Path::from(channel);
        let offset = Self::item_path(channel, key);

        let listed: object_store::Result<Vec<ObjectMeta>> = self
            .store
            .list_with_offset(Some(&prefix), &offset)
            .try_collect()
            .await;

        match listed {
            Ok(objects) => {
                let candidates: BTreeSet<ContentKey> = objects
                    .iter()
                    .filter_map(|meta| key_from_location(channel, &meta.location))
                    .collect();
                take_keys_after(candidates, key, count)
            }
            Err(error) => {
                tracing::warn!("query fail {} {} {}: {}", channel, key, count, error);
                Vec::new()
            }
        }
    }

    async fn last_key(&self, channel: &str) -> Option<ContentKey> {
        match self.list_prefix(&Path::from(channel)).await {
            Ok(objects) => objects
                .iter()
                .filter_map(|meta| key_from_location(channel, &meta.location))
                .max(),
            Err(error) => {
                tracing::warn!("unable to find last key of {}: {}", channel, error);
                None
            }
        }
    }

    async fn initialize_channel(&self, config: &ChannelConfig) -> Result<()> {
        validate_channel_name(&config.name)?;
        let marker = serde_json::to_vec(config)?;
        self.store
            .put(&Self::marker_path(&config.name), PutPayload::from(marker))
            .await?;
        Ok(())
    }

    async fn channel_exists(&self, channel: &str) -> bool {
        match self.store.head(&Self::marker_path(channel)).await {
            Ok(_) => true,
            Err(object_store::Error::NotFound { .. }) => false,
            Err(error) => {
                tracing::warn!("unable to check channel {}: {}", channel, error);
                false
            }
        }
    }

    async fn delete(&self, channel: &str) {
        let objects = match self.list_prefix(&Path::from(channel)).await {
            Ok(objects) => objects,
            Err(error) => {
                tracing::warn!("unable to list channel {} for delete: {}", channel, error);
                return;
            }
        };

        let mut failed = 0usize;
        for meta in &objects {
            if let Err(error) = self.store.delete(&meta.location).await {
                failed += 1;
                tracing::warn!("unable to delete {}: {}", meta.location, error);
            }
        }
        tracing::info!(
            "Deleted object channel {} ({} objects, {} failed)",
            channel,
            objects.len(),
            failed
        );
    }
}
