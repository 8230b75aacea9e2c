use super::{ReplicationDirectory, ReplicationDomain};
use crate::{HubError, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

/// Directory stored in one Redis hash per namespace: field = domain name,
/// value = JSON encoded [`ReplicationDomain`].
#[derive(Clone)]
pub struct RedisReplicationDirectory {
    conn: ConnectionManager,
    hash_key: String,
}

impl RedisReplicationDirectory {
    pub async fn new(url: &str, namespace: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|error| HubError::Config(format!("invalid redis url {}: {}", url, error)))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            hash_key: format!("{}:replication:domains", namespace),
        })
    }
}

fn decode_domain(raw: &str) -> Result<ReplicationDomain> {
    serde_json::from_str(raw).map_err(|error| {
        HubError::Internal(format!("invalid replication domain record: {}", error))
    })
}

#[async_trait]
impl ReplicationDirectory for RedisReplicationDirectory {
    async fn list_domains(&self) -> Result<Vec<ReplicationDomain>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.hvals(&self.hash_key).await?;

        let mut domains = Vec::with_capacity(raw.len());
        for value in raw {
            match decode_domain(&value) {
                Ok(domain) => domains.push(domain),
                Err(error) => tracing::warn!("skipping replication domain: {}", error),
            }
        }
        domains.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(domains)
    }

    async fn upsert(&self, domain: &ReplicationDomain) -> Result<()> {
        let payload = serde_json::to_string(domain)?;
        let mut conn = self.conn.clone();
        let _: () = conn.hset(&self.hash_key, &domain.domain, payload).await?;
        tracing::info!("Upserted replication domain {}", domain.domain);
        Ok(())
    }

    async fn get(&self, domain: &str) -> Result<Option<ReplicationDomain>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(&self.hash_key, domain).await?;
        raw.as_deref().map(decode_domain).transpose()
    }

    async fn delete(&self, domain: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(&self.hash_key, domain).await?;
        tracing::info!("Deleted replication domain {}", domain);
        Ok(())
    }
}
