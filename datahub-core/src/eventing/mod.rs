//! Real-time fanout of newly written keys.
//!
//! Writers publish each new key on an [`InsertionTopic`]; the
//! [`SubscriptionRoster`] keeps one topic subscription per registered
//! `(channel, consumer)` pair and hands every delivered key to its consumer in
//! URL form.

pub mod local_topic;
pub mod redis_topic;
pub mod roster;

pub use local_topic::LocalInsertionTopic;
pub use redis_topic::RedisInsertionTopic;
pub use roster::{ChannelConsumer, ChannelSender, KeyConsumer, SubscriptionRoster};

use crate::Result;
use crate::content::ContentKey;
use async_trait::async_trait;
use std::sync::Arc;

/// Callback run for every message delivered on a subscription.
pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Transport-level subscription returned by [`InsertionTopic::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicHandle {
    channel: String,
    id: u64,
}

impl TopicHandle {
    pub(crate) fn new(channel: impl Into<String>, id: u64) -> Self {
        Self {
            channel: channel.into(),
            id,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Pub/sub transport for insertion events.
///
/// Delivery is at-least-once and keeps publish order per subscriber. Once
/// `unsubscribe` returns, the handler is never invoked again.
#[async_trait]
pub trait InsertionTopic: Send + Sync {
    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<TopicHandle>;

    async fn unsubscribe(&self, handle: &TopicHandle) -> Result<()>;

    /// Publishes a key in its coordination-store form.
    async fn publish_key(&self, channel: &str, key: &ContentKey) -> Result<()> {
        self.publish(channel, &key.to_zk()).await
    }
}

pub type DynInsertionTopic = Arc<dyn InsertionTopic>;
