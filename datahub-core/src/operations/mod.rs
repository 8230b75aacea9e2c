pub mod insert_content;
pub mod replication_sync;

pub use insert_content::{
    InsertContentOperation, InsertContentOperationRequest, InsertContentOperationResult,
};
pub use replication_sync::{
    MigrationTarget, ReplicationSyncOperation, ReplicationSyncOperationRequest,
    ReplicationSyncOperationResult,
};
