use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use datahub_core::migration::replicated_hash;
use datahub_core::{
    ChannelConfig, ChannelSender, ContentKey, ContentStore, Content, HubError,
    InsertContentOperation, InsertContentOperationRequest, LocalInsertionTopic,
    MemoryContentStore, MemoryMigrationPositions, MemoryReplicationDirectory, MigratorSettings,
    PeerChannelClient, ReplicationDomain, ReplicationDomainCache, ReplicationSyncOperation,
    ReplicationSyncOperationRequest, Result, SqliteContentStore, SubscriptionRoster,
};
use std::sync::Arc;
use std::time::Duration;

/// Serves the items of a local store as a peer: sequence `n` is the n-th key
/// of the channel.
struct StorePeer {
    store: Arc<dyn ContentStore>,
    channel: String,
}

impl StorePeer {
    async fn keys(&self) -> Vec<ContentKey> {
        self.store
            .list_keys_after(&self.channel, &ContentKey::sentinel_start(), usize::MAX)
            .await
    }

    async fn key_at(&self, sequence: u64) -> Option<ContentKey> {
        let index = usize::try_from(sequence).ok()?.checked_sub(1)?;
        self.keys().await.get(index).cloned()
    }
}

#[async_trait]
impl PeerChannelClient for StorePeer {
    async fn get_configuration(&self, channel_url: &str) -> Result<ChannelConfig> {
        if !self.store.channel_exists(&self.channel).await {
            return Err(HubError::NotFound(channel_url.to_string()));
        }
        Ok(ChannelConfig::new(self.channel.clone()))
    }

    async fn get_latest_sequence(&self, _channel_url: &str) -> Result<Option<u64>> {
        let count = self.keys().await.len() as u64;
        Ok((count > 0).then_some(count))
    }

    async fn get_creation_time(
        &self,
        _channel_url: &str,
        sequence: u64,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self.key_at(sequence).await.map(|key| key.time()))
    }

    async fn get_content(&self, _channel_url: &str, sequence: u64) -> Result<Option<Content>> {
        let Some(key) = self.key_at(sequence).await else {
            return Ok(None);
        };
        let Some(content) = self.store.read(&self.channel, &key).await else {
            return Ok(None);
        };
        let mut builder = Content::builder()
            .key(ContentKey::with_time(key.time(), replicated_hash(sequence)))
            .data(content.data().clone());
        if let Some(content_type) = content.content_type() {
            builder = builder.content_type(content_type);
        }
        Ok(Some(builder.build()))
    }

    async fn list_channels(&self, _base_url: &str) -> Result<Vec<String>> {
        Ok(vec![self.channel.clone()])
    }
}

fn bologna() -> Content {
    Content::builder()
        .data("bologna")
        .content_type("text/plain")
        .build()
}

#[tokio::test]
async fn test_write_read_and_fanout_on_sqlite() {
    let temp = tempfile::tempdir().unwrap();
    let store: Arc<dyn ContentStore> =
        Arc::new(SqliteContentStore::new(temp.path().join("hub.db")).unwrap());
    store
        .initialize_channel(&ChannelConfig::new("UHF"))
        .await
        .unwrap();

    let topic = Arc::new(LocalInsertionTopic::new());
    let roster = SubscriptionRoster::new(topic.clone());
    let (listener, mut keys) = ChannelSender::new("dashboard");
    roster.subscribe("UHF", Arc::new(listener)).await.unwrap();

    let insert = InsertContentOperation::new(store.clone(), topic);
    let before = Utc::now() - ChronoDuration::seconds(1);
    let key = insert
        .run(InsertContentOperationRequest {
            channel: "UHF".to_string(),
            content: bologna(),
            ttl_days: 0,
        })
        .await
        .unwrap()
        .key;

    assert!(key.time() >= before && key.time() <= Utc::now());
    assert_eq!(keys.recv().await.unwrap(), key.to_url());

    let stored = store.read("UHF", &key).await.unwrap();
    assert_eq!(stored.data().as_ref(), b"bologna");
    assert_eq!(stored.content_type(), Some("text/plain"));

    let after = store
        .list_keys_after("UHF", &ContentKey::sentinel_start(), 10)
        .await;
    assert!(after.contains(&key));
    assert_eq!(store.resolve_key(&key.to_url()), Some(key));
}

#[tokio::test]
async fn test_peer_channel_is_replicated_into_second_hub() {
    let upstream: Arc<dyn ContentStore> = Arc::new(MemoryContentStore::new());
    upstream
        .initialize_channel(&ChannelConfig::new("UHF"))
        .await
        .unwrap();
    let upstream_insert =
        InsertContentOperation::new(upstream.clone(), Arc::new(LocalInsertionTopic::new()));
    for _ in 0..3 {
        upstream_insert
            .run(InsertContentOperationRequest {
                channel: "UHF".to_string(),
                content: bologna(),
                ttl_days: 0,
            })
            .await
            .unwrap();
    }

    let downstream = Arc::new(MemoryContentStore::new());
    let topic = Arc::new(LocalInsertionTopic::new());
    let roster = SubscriptionRoster::new(topic.clone());
    let (listener, mut keys) = ChannelSender::new("mirror");
    roster.subscribe("UHF", Arc::new(listener)).await.unwrap();

    let directory = Arc::new(MemoryReplicationDirectory::with_domains([
        ReplicationDomain::new("upstream", "http://upstream"),
    ]));
    let sync = ReplicationSyncOperation::new(
        Arc::new(ReplicationDomainCache::new(directory)),
        Arc::new(StorePeer {
            store: upstream.clone(),
            channel: "UHF".to_string(),
        }),
        InsertContentOperation::new(downstream.clone(), topic),
        Arc::new(MemoryMigrationPositions::new()),
        MigratorSettings {
            backoff: Duration::from_millis(10),
            ..MigratorSettings::default()
        },
    );

    let result = sync
        .run(ReplicationSyncOperationRequest::default())
        .await
        .unwrap();
    assert_eq!(result.started.len(), 1);

    let mut delivered = Vec::new();
    for _ in 0..3 {
        let url = tokio::time::timeout(Duration::from_secs(5), keys.recv())
            .await
            .unwrap()
            .unwrap();
        delivered.push(ContentKey::from_url(&url).unwrap());
    }
    sync.shutdown().await;

    assert_eq!(downstream.item_count("UHF").await, 3);
    let hashes: Vec<&str> = delivered.iter().map(ContentKey::hash).collect();
    assert_eq!(hashes, vec![replicated_hash(1), replicated_hash(2), replicated_hash(3)]);
    for key in &delivered {
        let copy = downstream.read("UHF", key).await.unwrap();
        assert_eq!(copy.data().as_ref(), b"bologna");
    }
}
