use datahub_core::{
    ContentStoreBuilder, DirectoryBuilder, HubError, MigratorSettings, ReplicationDomain, Result,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name of this hub, used in logs.
    pub hub_name: String,
    /// Prefix of every key this hub writes to Redis.
    #[serde(default)]
    pub namespace: Option<String>,
    pub storage: StorageConfig,
    #[serde(default)]
    pub eventing: EventingConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,
    #[serde(default)]
    pub s3: Option<S3Config>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
    S3,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
            Self::S3 => "s3",
        }
    }
}

/// Credentials come from the standard AWS environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventingConfig {
    #[serde(default)]
    pub backend: SharedBackend,
}

/// Backends that either live in process or are shared through Redis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharedBackend {
    #[default]
    Memory,
    Redis,
}

impl SharedBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default)]
    pub directory: SharedBackend,
    #[serde(default)]
    pub positions: SharedBackend,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_directory_refresh_secs")]
    pub directory_refresh_secs: u64,
    #[serde(default = "default_backoff_millis")]
    pub backoff_millis: u64,
    #[serde(default = "default_expiry_margin_secs")]
    pub expiry_margin_secs: u64,
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
    /// Domains written to the directory at startup.
    #[serde(default)]
    pub domains: Vec<ReplicationDomain>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            directory: SharedBackend::Memory,
            positions: SharedBackend::Memory,
            sync_interval_secs: default_sync_interval_secs(),
            directory_refresh_secs: default_directory_refresh_secs(),
            backoff_millis: default_backoff_millis(),
            expiry_margin_secs: default_expiry_margin_secs(),
            peer_timeout_secs: default_peer_timeout_secs(),
            domains: Vec::new(),
        }
    }
}

impl ReplicationConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    /// Number of sync ticks between forced directory refreshes.
    pub fn refresh_every_ticks(&self) -> u64 {
        (self.directory_refresh_secs / self.sync_interval_secs.max(1)).max(1)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs.max(1))
    }

    pub fn migrator_settings(&self) -> MigratorSettings {
        MigratorSettings {
            backoff: Duration::from_millis(self.backoff_millis),
            expiry_margin: Duration::from_secs(self.expiry_margin_secs),
        }
    }
}

fn default_sync_interval_secs() -> u64 {
    60
}

fn default_directory_refresh_secs() -> u64 {
    300
}

fn default_backoff_millis() -> u64 {
    5_000
}

fn default_expiry_margin_secs() -> u64 {
    10 * 60
}

fn default_peer_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("DATAHUB").separator("__"))
            .build()
            .map_err(|e| HubError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| HubError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn namespace_or_default(&self) -> &str {
        self.namespace
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or("datahub")
    }

    /// Redis url, required as soon as one backend lives in Redis.
    pub fn redis_url(&self) -> Result<&str> {
        self.redis
            .as_ref()
            .map(|redis| redis.url.as_str())
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                HubError::Config("redis configuration is required for redis backends".to_string())
            })
    }

    pub fn validate(&self) -> Result<()> {
        let uses_redis = [
            self.eventing.backend,
            self.replication.directory,
            self.replication.positions,
        ]
        .contains(&SharedBackend::Redis);
        if uses_redis {
            self.redis_url()?;
        }

        match self.storage.backend {
            StorageBackend::Sqlite if self.storage.sqlite_path.is_none() => Err(HubError::Config(
                "storage.sqlite_path is required for sqlite storage".to_string(),
            )),
            StorageBackend::S3 if self.storage.s3.is_none() => Err(HubError::Config(
                "storage.s3 is required for s3 storage".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn storage_builder(&self) -> ContentStoreBuilder {
        let mut builder = ContentStoreBuilder::new().backend(self.storage.backend.as_str());
        if let Some(path) = &self.storage.sqlite_path {
            builder = builder.sqlite_path(path.clone());
        }
        if let Some(s3) = &self.storage.s3 {
            builder = builder
                .s3_bucket(s3.bucket.clone())
                .s3_region(s3.region.clone());
            if let Some(endpoint) = &s3.endpoint {
                builder = builder.s3_endpoint(endpoint.clone());
            }
        }
        builder
    }

    pub fn directory_builder(&self) -> DirectoryBuilder {
        let mut builder = DirectoryBuilder::new()
            .backend(self.replication.directory.as_str())
            .namespace(self.namespace_or_default())
            .seed_domains(self.replication.domains.clone());
        if let Some(redis) = &self.redis {
            builder = builder.redis_url(redis.url.clone());
        }
        builder
    }
}
