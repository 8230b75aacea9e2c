use super::{ContentStore, MemoryContentStore, ObjectContentStore, SqliteContentStore};
use crate::{HubError, Result};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ContentStoreBuilder {
    backend: Option<String>,
    sqlite_path: Option<PathBuf>,
    s3_bucket: Option<String>,
    s3_region: Option<String>,
    s3_endpoint: Option<String>,
}

impl ContentStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn sqlite_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sqlite_path = Some(path.into());
        self
    }

    pub fn s3_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.s3_bucket = Some(bucket.into());
        self
    }

    pub fn s3_region(mut self, region: impl Into<String>) -> Self {
        self.s3_region = Some(region.into());
        self
    }

    pub fn s3_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.s3_endpoint = Some(endpoint.into());
        self
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
                "storage backend cannot be empty".to_string(),
            ));
        }

        Ok(backend)
    }

    pub fn build(&self) -> Result<Arc<dyn ContentStore>> {
        let backend = self.resolve_backend()?;

        match backend.as_str() {
            "memory" => Ok(Arc::new(MemoryContentStore::new())),
            "sqlite" => {
                let path = self.sqlite_path.clone().ok_or_else(|| {
                    HubError::Config("sqlite path is required for sqlite backend".to_string())
                })?;
                Ok(Arc::new(SqliteContentStore::new(path)?))
            }
            "s3" | "object" => {
                let bucket = self.s3_bucket.as_deref().unwrap_or_default().trim();
                if bucket.is_empty() {
                    return Err(HubError::Config(
                        "s3 bucket is required for s3 backend".to_string(),
                    ));
                }
                let region = self.s3_region.as_deref().unwrap_or("us-east-1");
                let store = ObjectContentStore::s3(bucket, region, self.s3_endpoint.as_deref())?;
                Ok(Arc::new(store))
            }
            "object_memory" => Ok(Arc::new(ObjectContentStore::in_memory())),
            other => Err(HubError::Config(format!(
                "unsupported storage backend: {}",
                other
            ))),
        }
    }
}
