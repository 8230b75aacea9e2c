use super::{PeerChannelClient, replicated_hash};
use crate::content::{ChannelConfig, Content, ContentKey};
use crate::{HubError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory peer hub with a single sequence space shared by all its channels.
pub(crate) struct FakePeer {
    config: Option<ChannelConfig>,
    channels: Mutex<Vec<String>>,
    items: Mutex<BTreeMap<u64, DateTime<Utc>>>,
    fetched: Mutex<Vec<u64>>,
    unreachable_heads: AtomicBool,
}

impl FakePeer {
    /// A peer without configuration answers every config request with
    /// `PeerConfigInvalid`.
    pub(crate) fn new(config: Option<ChannelConfig>) -> Self {
        let channels = config.iter().map(|config| config.name.clone()).collect();
        Self {
            config,
            channels: Mutex::new(channels),
            items: Mutex::new(BTreeMap::new()),
            fetched: Mutex::new(Vec::new()),
            unreachable_heads: AtomicBool::new(false),
        }
    }

    /// Makes every creation time request fail as if the peer were down.
    pub(crate) fn with_unreachable_heads(self) -> Self {
        self.unreachable_heads.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_items(
        self,
        sequences: impl IntoIterator<Item = u64>,
        created: DateTime<Utc>,
    ) -> Self {
        self.add(sequences, created);
        self
    }

    pub(crate) fn add(&self, sequences: impl IntoIterator<Item = u64>, created: DateTime<Utc>) {
        let mut items = self.items.lock().unwrap();
        for sequence in sequences {
            items.insert(sequence, created);
        }
    }

    pub(crate) fn set_channels(&self, channels: &[&str]) {
        *self.channels.lock().unwrap() = channels.iter().map(|c| c.to_string()).collect();
    }

    pub(crate) fn fetched(&self) -> Vec<u64> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerChannelClient for FakePeer {
    async fn get_configuration(&self, channel_url: &str) -> Result<ChannelConfig> {
        self.config
            .clone()
            .ok_or_else(|| HubError::PeerConfigInvalid(channel_url.to_string()))
    }

    async fn get_latest_sequence(&self, _channel_url: &str) -> Result<Option<u64>> {
        Ok(self.items.lock().unwrap().keys().next_back().copied())
    }

    async fn get_creation_time(
        &self,
        _channel_url: &str,
        sequence: u64,
    ) -> Result<Option<DateTime<Utc>>> {
        if self.unreachable_heads.load(Ordering::SeqCst) {
            return Err(HubError::PeerUnreachable(format!("HEAD {}", sequence)));
        }
        Ok(self.items.lock().unwrap().get(&sequence).copied())
    }

    async fn get_content(&self, _channel_url: &str, sequence: u64) -> Result<Option<Content>> {
        let created = self.items.lock().unwrap().get(&sequence).copied();
        Ok(created.map(|created| {
            self.fetched.lock().unwrap().push(sequence);
            Content::builder()
                .key(ContentKey::with_time(created, replicated_hash(sequence)))
                .data(format!("item {}", sequence))
                .content_type("text/plain")
                .build()
        }))
    }

    async fn list_channels(&self, _base_url: &str) -> Result<Vec<String>> {
        Ok(self.channels.lock().unwrap().clone())
    }
}
