//! Peer-to-local channel migration.
//!
//! A [`ChannelMigrator`] mirrors one channel of a peer hub into the local
//! store. On a cold start it searches the peer's sequence space for the
//! earliest item worth copying; afterwards it resumes from the last position
//! recorded in [`MigrationPositions`].

pub mod migrator;
pub mod peer_client;
pub mod positions;
pub mod search;

#[cfg(test)]
pub(crate) mod fake_peer;

pub use migrator::{ChannelMigrator, MigratorHandle, MigratorSettings, MigratorState};
pub use peer_client::HttpPeerClient;
pub use positions::{
    MemoryMigrationPositions, MigrationPosition, MigrationPositions, RedisMigrationPositions,
};
pub use search::search_starting_sequence;

use crate::Result;
use crate::content::{ChannelConfig, Content};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Lowest position of a peer sequence space. Real items start above it.
pub const SEQUENCE_START: u64 = 0;

/// Read access to a channel hosted on a peer hub.
///
/// Absent items are `Ok(None)`; transport problems are errors.
#[async_trait]
pub trait PeerChannelClient: Send + Sync {
    async fn get_configuration(&self, channel_url: &str) -> Result<ChannelConfig>;

    async fn get_latest_sequence(&self, channel_url: &str) -> Result<Option<u64>>;

    async fn get_creation_time(
        &self,
        channel_url: &str,
        sequence: u64,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn get_content(&self, channel_url: &str, sequence: u64) -> Result<Option<Content>>;

    /// Names of the channels hosted under `base_url`.
    async fn list_channels(&self, base_url: &str) -> Result<Vec<String>>;
}

pub type DynPeerChannelClient = Arc<dyn PeerChannelClient>;

/// Discriminator for content replicated from `sequence`.
///
/// Deterministic so that migrating a position twice lands on the same key.
pub fn replicated_hash(sequence: u64) -> String {
    format!("{:010}", sequence)
}

/// Peer sequence encoded by [`replicated_hash`], `None` for locally
/// assigned discriminators.
pub fn replicated_sequence(hash: &str) -> Option<u64> {
    if hash.len() < 10 || !hash.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    hash.parse().ok()
}
