use super::{
    MemoryReplicationDirectory, RedisReplicationDirectory, ReplicationDirectory, ReplicationDomain,
};
use crate::{HubError, Result};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct DirectoryBuilder {
    backend: Option<String>,
    namespace: Option<String>,
    redis_url: Option<String>,
    seed_domains: Vec<ReplicationDomain>,
}

impl DirectoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Domains written into the directory when it is built.
    pub fn seed_domains(mut self, domains: Vec<ReplicationDomain>) -> Self {
        self.seed_domains = domains;
        self
    }

    fn resolve_namespace(&self) -> Result<String> {
        let namespace = self
            .namespace
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_string();
        if namespace.is_empty() {
            return Err(HubError::Config(
                "directory namespace cannot be empty".to_string(),
            ));
        }

        Ok(namespace)
    }

    fn resolve_backend(&self) -> Result<String> {
        let backend = self
            .backend
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if backend.is_empty() {
            return Err(HubError::Config(
                "directory backend cannot be empty".to_string(),
            ));
        }

        Ok(backend)
    }

    pub async fn build(&self) -> Result<Arc<dyn ReplicationDirectory>> {
        let backend = self.resolve_backend()?;

        let directory: Arc<dyn ReplicationDirectory> = match backend.as_str() {
            "memory" => Arc::new(MemoryReplicationDirectory::new()),
            "redis" => {
                let namespace = self.resolve_namespace()?;
                let url = self.redis_url.as_deref().unwrap_or_default().trim();
                if url.is_empty() {
                    return Err(HubError::Config(
                        "redis url is required for redis backend".to_string(),
                    ));
                }

                Arc::new(RedisReplicationDirectory::new(url, &namespace).await?)
            }
            other => {
                return Err(HubError::Config(format!(
                    "unsupported directory backend: {}",
                    other
                )));
            }
        };

        for domain in &self.seed_domains {
            directory.upsert(domain).await?;
        }

        Ok(directory)
    }
}
