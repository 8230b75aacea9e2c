use super::{
    MigrationPosition, MigrationPositions, PeerChannelClient, SEQUENCE_START,
    replicated_sequence, search_starting_sequence,
};
use crate::content::ChannelConfig;
use crate::operations::{InsertContentOperation, InsertContentOperationRequest};
use crate::{HubError, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct MigratorSettings {
    /// Pause before probing a position the peer did not have yet.
    pub backoff: Duration,
    /// Items expiring within this margin are not worth copying on a cold start.
    pub expiry_margin: Duration,
}

impl Default for MigratorSettings {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            expiry_margin: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigratorState {
    Uninitialized,
    Priming,
    Streaming,
    Aborted,
}

/// Copies one peer channel into the local store, item by item, for as long as
/// it runs.
pub struct ChannelMigrator {
    channel: String,
    channel_url: String,
    peer: Arc<dyn PeerChannelClient>,
    insert: InsertContentOperation,
    positions: Arc<dyn MigrationPositions>,
    settings: MigratorSettings,
}

impl ChannelMigrator {
    pub fn new(
        channel: impl Into<String>,
        channel_url: impl Into<String>,
        peer: Arc<dyn PeerChannelClient>,
        insert: InsertContentOperation,
        positions: Arc<dyn MigrationPositions>,
        settings: MigratorSettings,
    ) -> Self {
        Self {
            channel: channel.into(),
            channel_url: channel_url.into(),
            peer,
            insert,
            positions,
            settings,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn channel_url(&self) -> &str {
        &self.channel_url
    }

    /// Spawns the migration task.
    pub fn start(self) -> MigratorHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let channel = self.channel.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        MigratorHandle {
            channel,
            cancel,
            task,
        }
    }

    async fn run(self, cancel: CancellationToken) -> MigratorState {
        tracing::info!("Priming migration of {} from {}", self.channel, self.channel_url);

        let primed = tokio::select! {
            _ = cancel.cancelled() => return MigratorState::Priming,
            primed = self.prime() => primed,
        };
        let (config, sequence) = match primed {
            Ok(primed) => primed,
            Err(error) => {
                tracing::warn!(
                    "Aborting migration of {} from {}: {}",
                    self.channel,
                    self.channel_url,
                    error
                );
                return MigratorState::Aborted;
            }
        };

        tracing::info!(
            "Starting {} migration at {}",
            self.channel_url,
            sequence
        );
        self.stream(&config, sequence, &cancel).await;
        tracing::info!("Stopped migration of {}", self.channel);
        MigratorState::Streaming
    }

    /// Fetches the peer configuration, creates the local channel when missing
    /// and finds the first sequence to copy.
    async fn prime(&self) -> Result<(ChannelConfig, u64)> {
        let peer_config = self.peer.get_configuration(&self.channel_url).await?;
        let config = ChannelConfig {
            name: self.channel.clone(),
            ..peer_config
        };

        // TTL changes made on the peer after this point are not picked up.
        let store = self.insert.store();
        if !store.channel_exists(&self.channel).await {
            store.initialize_channel(&config).await?;
            self.positions
                .record(&self.channel, &MigrationPosition::start())
                .await?;
            tracing::info!("Created local channel {}", self.channel);
        }

        let sequence = match self.resume_sequence().await? {
            Some(sequence) => sequence,
            None => self.search_start(&config).await?,
        };
        Ok((config, sequence))
    }

    /// Position after the last item already copied, from the recorded
    /// position or else from the last replicated key of the local store.
    async fn resume_sequence(&self) -> Result<Option<u64>> {
        match self.positions.last_position(&self.channel).await? {
            Some(position) if !position.is_start() => return Ok(Some(position.sequence + 1)),
            _ => {}
        }

        let Some(key) = self.insert.store().last_key(&self.channel).await else {
            return Ok(None);
        };
        let Some(sequence) = replicated_sequence(key.hash()) else {
            return Ok(None);
        };
        tracing::info!(
            "Resuming {} after stored key {} (sequence {})",
            self.channel,
            key,
            sequence
        );
        self.positions
            .record(&self.channel, &MigrationPosition::new(sequence, key))
            .await?;
        Ok(Some(sequence + 1))
    }

    async fn search_start(&self, config: &ChannelConfig) -> Result<u64> {
        tracing::info!("Searching the key space of {}", self.channel_url);
        let latest = self.peer.get_latest_sequence(&self.channel_url).await?;
        let ttl_millis = config.effective_ttl_millis();
        search_starting_sequence(SEQUENCE_START, latest, |sequence| {
            self.exists_and_not_expiring(sequence, ttl_millis)
        })
        .await
    }

    async fn exists_and_not_expiring(&self, sequence: u64, ttl_millis: Option<u64>) -> Result<bool> {
        let Some(created) = self
            .peer
            .get_creation_time(&self.channel_url, sequence)
            .await?
        else {
            return Ok(false);
        };

        let Some(ttl_millis) = ttl_millis else {
            return Ok(true);
        };
        let ttl = chrono::Duration::milliseconds(i64::try_from(ttl_millis).unwrap_or(i64::MAX));
        let margin = chrono::Duration::milliseconds(
            i64::try_from(self.settings.expiry_margin.as_millis()).unwrap_or(i64::MAX),
        );
        match Utc::now()
            .checked_sub_signed(ttl)
            .and_then(|oldest| oldest.checked_add_signed(margin))
        {
            Some(threshold) => Ok(created > threshold),
            None => Ok(true),
        }
    }

    async fn stream(&self, config: &ChannelConfig, mut sequence: u64, cancel: &CancellationToken) {
        let ttl_days = config.ttl_days_or_unlimited();
        while !cancel.is_cancelled() {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return,
                fetched = self.peer.get_content(&self.channel_url, sequence) => fetched,
            };

            let content = match fetched {
                Ok(Some(content)) => content,
                Ok(None) => {
                    tracing::debug!("{} has nothing at {} yet", self.channel_url, sequence);
                    self.backoff(cancel).await;
                    continue;
                }
                Err(error) => {
                    tracing::warn!(
                        "Fetching {} at {} failed: {}",
                        self.channel_url,
                        sequence,
                        error
                    );
                    self.backoff(cancel).await;
                    continue;
                }
            };

            let replicated_key = content.key().cloned();
            let request = InsertContentOperationRequest {
                channel: self.channel.clone(),
                content,
                ttl_days,
            };
            let key = match (self.insert.run(request).await, replicated_key) {
                (Ok(result), _) => result.key,
                (Err(HubError::Transport(message)), Some(key)) => {
                    tracing::warn!("Migrated {} without notifying listeners: {}", key, message);
                    key
                }
                (Err(error), _) => {
                    tracing::warn!(
                        "Inserting {} sequence {} failed: {}",
                        self.channel,
                        sequence,
                        error
                    );
                    self.backoff(cancel).await;
                    continue;
                }
            };

            let position = MigrationPosition::new(sequence, key);
            if let Err(error) = self.positions.record(&self.channel, &position).await {
                tracing::warn!(
                    "Recording position {} of {} failed: {}",
                    sequence,
                    self.channel,
                    error
                );
            }
            sequence += 1;
        }
    }

    async fn backoff(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.settings.backoff) => {}
        }
    }
}

/// Lifecycle control of a started [`ChannelMigrator`].
pub struct MigratorHandle {
    channel: String,
    cancel: CancellationToken,
    task: JoinHandle<MigratorState>,
}

impl MigratorHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signals the migrator and waits for it to finish its current step.
    pub async fn stop(self) -> MigratorState {
        self.cancel.cancel();
        self.wait().await
    }

    /// Waits for the migrator to end on its own (it only does so when
    /// priming aborts) and returns the state it ended in.
    pub async fn wait(self) -> MigratorState {
        match self.task.await {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!("Migrator task for {} failed: {}", self.channel, error);
                MigratorState::Aborted
            }
        }
    }
}
