use super::{InsertionTopic, MessageHandler, TopicHandle};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-process topic for single-node deployments and tests.
///
/// Handlers run synchronously inside `publish` while the subscriber table is
/// read-locked, so an `unsubscribe` waits for in-flight deliveries. Handlers
/// must not subscribe or unsubscribe on the same topic.
#[derive(Default)]
pub struct LocalInsertionTopic {
    handlers: RwLock<HashMap<String, Vec<(u64, MessageHandler)>>>,
    next_id: AtomicU64,
}

impl LocalInsertionTopic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscription_count(&self, channel: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(channel)
            .map(Vec::len)
            .unwrap_or_default()
    }
}

#[async_trait]
impl InsertionTopic for LocalInsertionTopic {
    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(subscribers) = handlers.get(channel) {
            for (_, handler) in subscribers {
                handler(message.to_string());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<TopicHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(channel.to_string())
            .or_default()
            .push((id, handler));
        Ok(TopicHandle::new(channel, id))
    }

    async fn unsubscribe(&self, handle: &TopicHandle) -> Result<()> {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(subscribers) = handlers.get_mut(handle.channel()) {
            subscribers.retain(|(id, _)| *id != handle.id());
            if subscribers.is_empty() {
                handlers.remove(handle.channel());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collector() -> (MessageHandler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: MessageHandler = Arc::new(move |message| sink.lock().unwrap().push(message));
        (handler, seen)
    }

    #[tokio::test]
    async fn test_publish_reaches_channel_subscribers_in_order() {
        let topic = LocalInsertionTopic::new();
        let (handler, seen) = collector();
        let (other_handler, other_seen) = collector();
        topic.subscribe("UHF", handler).await.unwrap();
        topic.subscribe("VHF", other_handler).await.unwrap();

        topic.publish("UHF", "1").await.unwrap();
        topic.publish("UHF", "2").await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["1", "2"]);
        assert!(other_seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_delivery_after_unsubscribe() {
        let topic = LocalInsertionTopic::new();
        let (handler, seen) = collector();
        let handle = topic.subscribe("UHF", handler).await.unwrap();
        assert_eq!(topic.subscription_count("UHF"), 1);

        topic.unsubscribe(&handle).await.unwrap();
        topic.publish("UHF", "late").await.unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(topic.subscription_count("UHF"), 0);

        // unknown handles are ignored
        topic.unsubscribe(&handle).await.unwrap();
    }
}
