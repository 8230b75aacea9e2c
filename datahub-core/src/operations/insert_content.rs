use crate::content::{Content, ContentKey, validate_channel_name};
use crate::eventing::InsertionTopic;
use crate::storage::ContentStore;
use crate::{HubError, Result};
use std::sync::Arc;

/// Writes an item and announces its key to the channel's listeners.
#[derive(Clone)]
pub struct InsertContentOperation {
    store: Arc<dyn ContentStore>,
    topic: Arc<dyn InsertionTopic>,
}

#[derive(Debug, Clone)]
pub struct InsertContentOperationRequest {
    pub channel: String,
    pub content: Content,
    pub ttl_days: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertContentOperationResult {
    pub key: ContentKey,
}

impl InsertContentOperation {
    pub fn new(store: Arc<dyn ContentStore>, topic: Arc<dyn InsertionTopic>) -> Self {
        Self { store, topic }
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    /// The write is durable before the key is published. A publish failure is
    /// returned as [`HubError::Transport`] even though the item is stored.
    pub async fn run(
        &self,
        request: InsertContentOperationRequest,
    ) -> Result<InsertContentOperationResult> {
        let InsertContentOperationRequest {
            channel,
            content,
            ttl_days,
        } = request;

        validate_channel_name(&channel)?;
        let key = self.store.write(&channel, content, ttl_days).await?;

        if let Err(error) = self.topic.publish_key(&channel, &key).await {
            tracing::warn!(
                "Stored {} in {} but failed to publish it: {}",
                key,
                channel,
                error
            );
            return Err(match error {
                HubError::Transport(message) => HubError::Transport(message),
                other => HubError::Transport(other.to_string()),
            });
        }

        Ok(InsertContentOperationResult { key })
    }
}
