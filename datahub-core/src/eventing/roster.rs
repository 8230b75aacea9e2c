use super::{InsertionTopic, MessageHandler, TopicHandle};
use crate::Result;
use crate::content::ContentKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A listener interested in every key written to a channel.
pub trait KeyConsumer: Send + Sync {
    /// Identity used to match `unsubscribe` calls against registrations.
    fn id(&self) -> &str;

    /// Receives a newly written key in URL form.
    fn accept(&self, key_url: String);
}

/// Registration key. Equality is structural over channel name and consumer id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelConsumer {
    pub channel: String,
    pub consumer_id: String,
}

impl ChannelConsumer {
    pub fn new(channel: impl Into<String>, consumer_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            consumer_id: consumer_id.into(),
        }
    }
}

/// Forwards delivered keys into an unbounded channel.
pub struct ChannelSender {
    id: String,
    sender: mpsc::UnboundedSender<String>,
}

impl ChannelSender {
    pub fn new(id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                id: id.into(),
                sender,
            },
            receiver,
        )
    }
}

impl KeyConsumer for ChannelSender {
    fn id(&self) -> &str {
        &self.id
    }

    fn accept(&self, key_url: String) {
        if self.sender.send(key_url).is_err() {
            tracing::debug!("Receiver for consumer {} is gone", self.id);
        }
    }
}

struct Registration {
    consumer: Arc<dyn KeyConsumer>,
    handle: TopicHandle,
}

/// Tracks which consumers listen on which channel and owns their transport
/// subscriptions.
pub struct SubscriptionRoster {
    topic: Arc<dyn InsertionTopic>,
    registrations: Mutex<HashMap<ChannelConsumer, Registration>>,
}

impl SubscriptionRoster {
    pub fn new(topic: Arc<dyn InsertionTopic>) -> Self {
        Self {
            topic,
            registrations: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes `consumer` to `channel`.
    ///
    /// Subscribing a pair that is already registered replaces its transport
    /// subscription, so each pair keeps at most one live handle.
    pub async fn subscribe(&self, channel: &str, consumer: Arc<dyn KeyConsumer>) -> Result<()> {
        let target = consumer.clone();
        let channel_name = channel.to_string();
        let handler: MessageHandler = Arc::new(move |message| match ContentKey::from_zk(&message) {
            Some(key) => target.accept(key.to_url()),
            None => tracing::warn!(
                "Ignoring malformed key {} delivered on {}",
                message,
                channel_name
            ),
        });

        let handle = self.topic.subscribe(channel, handler).await?;
        let pair = ChannelConsumer::new(channel, consumer.id());
        tracing::debug!("Subscribed {} to {}", pair.consumer_id, channel);

        let previous = self
            .lock()
            .insert(pair, Registration { consumer, handle });

        if let Some(previous) = previous {
            self.topic.unsubscribe(&previous.handle).await?;
        }
        Ok(())
    }

    /// Removes the registration for `(channel, consumer)`. Unknown pairs are
    /// ignored.
    pub async fn unsubscribe(&self, channel: &str, consumer: &dyn KeyConsumer) -> Result<()> {
        let pair = ChannelConsumer::new(channel, consumer.id());
        let removed = self.lock().remove(&pair);

        match removed {
            Some(registration) => {
                self.topic.unsubscribe(&registration.handle).await?;
                tracing::debug!("Unsubscribed {} from {}", pair.consumer_id, channel);
            }
            None => tracing::debug!("No subscription for {} on {}", pair.consumer_id, channel),
        }
        Ok(())
    }

    pub fn subscriber_count_total(&self) -> usize {
        self.lock().len()
    }

    /// Snapshot of the consumers registered on `channel`.
    pub fn subscribers_for(&self, channel: &str) -> Vec<Arc<dyn KeyConsumer>> {
        self.lock()
            .iter()
            .filter(|(pair, _)| pair.channel == channel)
            .map(|(_, registration)| registration.consumer.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ChannelConsumer, Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
