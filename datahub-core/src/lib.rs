//! Datahub Core - time-ordered channel storage with peer replication
//!
//! Building blocks of a hub node:
//! - content keys ordered by millisecond time, then discriminator
//! - pluggable channel stores (memory, SQLite, object storage)
//! - insertion fanout to channel listeners over a pub/sub topic
//! - channel migration from peer hubs, driven by a cached replication directory

pub mod content;
pub mod error;
pub mod eventing;
pub mod migration;
pub mod operations;
pub mod registry;
pub mod storage;

pub use content::{
    ChannelConfig, Content, ContentBuilder, ContentKey, MinutePath, validate_channel_name,
};
pub use error::{HubError, Result};
pub use eventing::{
    ChannelConsumer, ChannelSender, DynInsertionTopic, InsertionTopic, KeyConsumer,
    LocalInsertionTopic, MessageHandler, RedisInsertionTopic, SubscriptionRoster, TopicHandle,
};
pub use migration::{
    ChannelMigrator, HttpPeerClient, MemoryMigrationPositions, MigrationPosition,
    MigrationPositions, MigratorHandle, MigratorSettings, MigratorState, PeerChannelClient,
    RedisMigrationPositions, SEQUENCE_START, search_starting_sequence,
};
pub use operations::{
    InsertContentOperation, InsertContentOperationRequest, InsertContentOperationResult,
    MigrationTarget, ReplicationSyncOperation, ReplicationSyncOperationRequest,
    ReplicationSyncOperationResult,
};
pub use registry::{
    ChannelInclusion, DirectoryBuilder, DynReplicationDirectory, MemoryReplicationDirectory,
    RedisReplicationDirectory, ReplicationDirectory, ReplicationDomain, ReplicationDomainCache,
};
pub use storage::{
    ContentStore, ContentStoreBuilder, DynContentStore, KEYS_AFTER_WINDOW_MILLIS,
    MemoryContentStore, ObjectContentStore, SqliteContentStore,
};
