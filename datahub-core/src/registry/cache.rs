use super::{ReplicationDirectory, ReplicationDomain};
use crate::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Caches the domain list of a [`ReplicationDirectory`].
///
/// The list is fetched on first use and again only when a caller forces a
/// refresh. The lock is held across the fetch, so concurrent callers wait for
/// the in-flight refresh instead of issuing their own. Single-domain calls go
/// straight to the directory and leave the cached list alone.
pub struct ReplicationDomainCache {
    directory: Arc<dyn ReplicationDirectory>,
    domains: Mutex<Option<Arc<Vec<ReplicationDomain>>>>,
}

impl ReplicationDomainCache {
    pub fn new(directory: Arc<dyn ReplicationDirectory>) -> Self {
        Self {
            directory,
            domains: Mutex::new(None),
        }
    }

    pub async fn get_domains(&self, force_refresh: bool) -> Result<Arc<Vec<ReplicationDomain>>> {
        let mut cached = self.domains.lock().await;
        if let Some(domains) = cached.as_ref().filter(|_| !force_refresh) {
            return Ok(domains.clone());
        }

        let domains = Arc::new(self.directory.list_domains().await?);
        tracing::debug!("Refreshed {} replication domains", domains.len());
        *cached = Some(domains.clone());
        Ok(domains)
    }

    pub async fn upsert(&self, domain: &ReplicationDomain) -> Result<()> {
        self.directory.upsert(domain).await
    }

    pub async fn get(&self, domain: &str) -> Result<Option<ReplicationDomain>> {
        self.directory.get(domain).await
    }

    pub async fn delete(&self, domain: &str) -> Result<()> {
        self.directory.delete(domain).await
    }
}
