//! Replication directory: which peer hubs this instance replicates and which
//! of their channels are included.

pub mod cache;
pub mod factory;
pub mod memory;
pub mod redis;

pub use cache::ReplicationDomainCache;
pub use factory::DirectoryBuilder;
pub use memory::MemoryReplicationDirectory;
pub use self::redis::RedisReplicationDirectory;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Which channels of a peer are replicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "mode", content = "channels")]
pub enum ChannelInclusion {
    #[default]
    All,
    Only(BTreeSet<String>),
}

/// A peer hub this instance replicates from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationDomain {
    pub domain: String,
    /// Base address of the peer, e.g. `http://hub.example.com`.
    pub base_url: String,
    #[serde(default)]
    pub include: ChannelInclusion,
}

impl ReplicationDomain {
    pub fn new(domain: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            base_url: base_url.into(),
            include: ChannelInclusion::All,
        }
    }

    pub fn only<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = ChannelInclusion::Only(channels.into_iter().map(Into::into).collect());
        self
    }

    pub fn includes(&self, channel: &str) -> bool {
        match &self.include {
            ChannelInclusion::All => true,
            ChannelInclusion::Only(channels) => channels.contains(channel),
        }
    }

    /// URL of a channel on the peer, with a trailing slash.
    pub fn channel_url(&self, channel: &str) -> String {
        format!("{}/channel/{}/", self.base_url.trim_end_matches('/'), channel)
    }
}

#[async_trait]
pub trait ReplicationDirectory: Send + Sync {
    async fn list_domains(&self) -> Result<Vec<ReplicationDomain>>;

    async fn upsert(&self, domain: &ReplicationDomain) -> Result<()>;

    async fn get(&self, domain: &str) -> Result<Option<ReplicationDomain>>;

    async fn delete(&self, domain: &str) -> Result<()>;
}

pub type DynReplicationDirectory = Arc<dyn ReplicationDirectory>;
