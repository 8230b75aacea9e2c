use super::{ReplicationDirectory, ReplicationDomain};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Directory kept in process memory, seeded from configuration.
#[derive(Default)]
pub struct MemoryReplicationDirectory {
    domains: RwLock<BTreeMap<String, ReplicationDomain>>,
}

impl MemoryReplicationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domains(domains: impl IntoIterator<Item = ReplicationDomain>) -> Self {
        let domains = domains
            .into_iter()
            .map(|domain| (domain.domain.clone(), domain))
            .collect();
        Self {
            domains: RwLock::new(domains),
        }
    }
}

#[async_trait]
impl ReplicationDirectory for MemoryReplicationDirectory {
    async fn list_domains(&self) -> Result<Vec<ReplicationDomain>> {
        Ok(self.domains.read().await.values().cloned().collect())
    }

    async fn upsert(&self, domain: &ReplicationDomain) -> Result<()> {
        self.domains
            .write()
            .await
            .insert(domain.domain.clone(), domain.clone());
        Ok(())
    }

    async fn get(&self, domain: &str) -> Result<Option<ReplicationDomain>> {
        Ok(self.domains.read().await.get(domain).cloned())
    }

    async fn delete(&self, domain: &str) -> Result<()> {
        self.domains.write().await.remove(domain);
        Ok(())
    }
}
