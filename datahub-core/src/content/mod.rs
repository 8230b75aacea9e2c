//! Content model: keys, items and channel configuration.

pub mod key;

pub use key::{ContentKey, HASH_LENGTH, MinutePath};

use crate::error::{HubError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

const MILLIS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

/// One item of a channel, moved between callers and a [`crate::ContentStore`].
///
/// Content without a key is new content; the store assigns a key on write.
/// Content that already carries a key (replicated from a peer) is persisted
/// under exactly that key.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    key: Option<ContentKey>,
    data: Bytes,
    content_type: Option<String>,
    content_language: Option<String>,
    user: Option<String>,
    millis: i64,
}

impl Content {
    pub fn builder() -> ContentBuilder {
        ContentBuilder::default()
    }

    pub fn key(&self) -> Option<&ContentKey> {
        self.key.as_ref()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_language(&self) -> Option<&str> {
        self.content_language.as_deref()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn millis(&self) -> i64 {
        self.millis
    }

    pub fn is_new_content(&self) -> bool {
        self.key.is_none()
    }

    /// Assigns the key of new content. A key is never reassigned.
    pub fn assign_key(&mut self, key: ContentKey) -> Result<()> {
        if let Some(existing) = &self.key {
            return Err(HubError::KeyAlreadyAssigned(existing.to_url()));
        }
        self.millis = key.millis();
        self.key = Some(key);
        Ok(())
    }

    /// Returns the assigned key, assigning a fresh one to new content.
    pub(crate) fn key_or_assign(&mut self) -> ContentKey {
        match &self.key {
            Some(key) => key.clone(),
            None => {
                let key = ContentKey::new();
                self.millis = key.millis();
                self.key = Some(key.clone());
                key
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContentBuilder {
    key: Option<ContentKey>,
    data: Bytes,
    content_type: Option<String>,
    content_language: Option<String>,
    user: Option<String>,
}

impl ContentBuilder {
    pub fn key(mut self, key: ContentKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn content_language(mut self, content_language: impl Into<String>) -> Self {
        self.content_language = Some(content_language.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn build(self) -> Content {
        let millis = self.key.as_ref().map(ContentKey::millis).unwrap_or_default();
        Content {
            key: self.key,
            data: self.data,
            content_type: self.content_type,
            content_language: self.content_language,
            user: self.user,
            millis,
        }
    }
}

/// Channel configuration as published by a hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default)]
    pub ttl_millis: Option<u64>,
    #[serde(default)]
    pub ttl_days: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ttl_millis: None,
            ttl_days: None,
            description: None,
        }
    }

    pub fn with_ttl_millis(mut self, ttl_millis: u64) -> Self {
        self.ttl_millis = Some(ttl_millis);
        self
    }

    pub fn with_ttl_days(mut self, ttl_days: u64) -> Self {
        self.ttl_days = Some(ttl_days);
        self
    }

    /// Retention in millis, `None` when the channel keeps items forever.
    pub fn effective_ttl_millis(&self) -> Option<u64> {
        self.ttl_millis
            .or_else(|| self.ttl_days.map(|days| days.saturating_mul(MILLIS_PER_DAY)))
    }

    /// Retention in whole days as passed to [`crate::ContentStore::write`];
    /// zero means unlimited.
    pub fn ttl_days_or_unlimited(&self) -> u64 {
        match self.effective_ttl_millis() {
            Some(millis) => millis.div_ceil(MILLIS_PER_DAY).max(1),
            None => 0,
        }
    }
}

pub fn validate_channel_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(HubError::InvalidChannel(
            "channel name cannot be empty".to_string(),
        ));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(HubError::InvalidChannel(format!(
            "channel name may only contain letters, digits, '_' and '-': {}",
            name
        )));
    }
    Ok(())
}
