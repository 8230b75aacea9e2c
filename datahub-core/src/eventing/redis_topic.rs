use super::{InsertionTopic, MessageHandler, TopicHandle};
use crate::{HubError, Result};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, PubSub};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

struct Subscription {
    /// Cleared under the lock by `unsubscribe`; deliveries hold it while the
    /// handler runs.
    active: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

/// Redis pub/sub topic. Each subscription owns a dedicated pubsub connection
/// and a forwarding task, which reconnects until the subscription is removed.
/// Messages published while a connection is being re-established are lost.
pub struct RedisInsertionTopic {
    client: redis::Client,
    publisher: ConnectionManager,
    namespace: String,
    subscriptions: Mutex<HashMap<u64, Subscription>>,
    next_id: AtomicU64,
}

impl RedisInsertionTopic {
    pub async fn new(url: &str, namespace: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|error| HubError::Config(format!("invalid redis url {}: {}", url, error)))?;
        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|error| HubError::Transport(format!("redis connect failed: {}", error)))?;
        Ok(Self {
            client,
            publisher,
            namespace: namespace.to_string(),
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }

    fn topic_name(&self, channel: &str) -> String {
        format!("{}:insertions:{}", self.namespace, channel)
    }
}

impl Drop for RedisInsertionTopic {
    fn drop(&mut self) {
        let subscriptions = self
            .subscriptions
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, subscription) in subscriptions.drain() {
            subscription.task.abort();
        }
    }
}

#[async_trait]
impl InsertionTopic for RedisInsertionTopic {
    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.publisher.clone();
        let _: () = conn
            .publish(self.topic_name(channel), message)
            .await
            .map_err(|error| HubError::Transport(format!("publish to {} failed: {}", channel, error)))?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<TopicHandle> {
        let topic = self.topic_name(channel);
        let pubsub = open_pubsub(&self.client, &topic).await?;

        let active = Arc::new(Mutex::new(true));
        let task = tokio::spawn(run_subscription(
            self.client.clone(),
            topic,
            pubsub,
            active.clone(),
            handler,
        ));

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, Subscription { active, task });

        Ok(TopicHandle::new(channel, id))
    }

    async fn unsubscribe(&self, handle: &TopicHandle) -> Result<()> {
        let removed = self
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&handle.id());

        if let Some(subscription) = removed {
            *subscription
                .active
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = false;
            subscription.task.abort();
        }
        Ok(())
    }
}

async fn open_pubsub(client: &redis::Client, topic: &str) -> Result<PubSub> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|error| HubError::Transport(format!("pubsub connect failed: {}", error)))?;
    pubsub
        .subscribe(topic)
        .await
        .map_err(|error| HubError::Transport(format!("subscribe to {} failed: {}", topic, error)))?;
    Ok(pubsub)
}

fn is_open(gate: &Mutex<bool>) -> bool {
    *gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Forwards `pubsub` to `handler`, reconnecting whenever the stream ends,
/// until the gate is closed.
async fn run_subscription(
    client: redis::Client,
    topic: String,
    pubsub: PubSub,
    gate: Arc<Mutex<bool>>,
    handler: MessageHandler,
) {
    let mut connection = Some(pubsub);
    loop {
        if let Some(pubsub) = connection.take() {
            let messages = pubsub
                .into_on_message()
                .map(|message| message.get_payload::<String>());
            if forward(messages, &topic, &gate, &handler).await == Forwarding::Closed {
                tracing::debug!("pubsub forwarding for {} finished", topic);
                return;
            }
            tracing::warn!("pubsub connection for {} ended, resubscribing", topic);
        }

        tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
        if !is_open(&gate) {
            return;
        }
        match open_pubsub(&client, &topic).await {
            Ok(pubsub) => {
                tracing::info!("resubscribed to {}", topic);
                connection = Some(pubsub);
            }
            Err(error) => tracing::warn!("{}", error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Forwarding {
    /// The subscription was removed.
    Closed,
    /// The message stream ran dry while the subscription was still wanted.
    StreamEnded,
}

/// Hands each decoded payload to `handler` while the gate is open. The gate
/// stays locked while the handler runs, so no delivery starts after
/// `unsubscribe` has closed it.
async fn forward<S, E>(
    messages: S,
    topic: &str,
    gate: &Mutex<bool>,
    handler: &MessageHandler,
) -> Forwarding
where
    S: Stream<Item = std::result::Result<String, E>>,
    E: Display,
{
    let mut messages = std::pin::pin!(messages);
    while let Some(message) = messages.next().await {
        let payload = match message {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!("dropping undecodable message on {}: {}", topic, error);
                continue;
            }
        };
        {
            let open = gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if !*open {
                return Forwarding::Closed;
            }
            handler(payload);
        }
    }

    if is_open(gate) {
        Forwarding::StreamEnded
    } else {
        Forwarding::Closed
    }
}
