use super::InsertContentOperation;
use crate::Result;
use crate::content::validate_channel_name;
use crate::migration::{
    ChannelMigrator, MigrationPositions, MigratorHandle, MigratorSettings, PeerChannelClient,
};
use crate::registry::ReplicationDomainCache;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A peer channel mirrored into the local channel of the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MigrationTarget {
    pub domain: String,
    pub channel: String,
}

impl MigrationTarget {
    pub fn new(domain: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            channel: channel.into(),
        }
    }
}

/// Keeps one running [`ChannelMigrator`] per replicated peer channel.
///
/// Each run reconciles the running migrators with the replication directory:
/// new targets are started, targets no longer included are stopped, and
/// migrators that aborted are started again.
pub struct ReplicationSyncOperation {
    domains: Arc<ReplicationDomainCache>,
    peer: Arc<dyn PeerChannelClient>,
    insert: InsertContentOperation,
    positions: Arc<dyn MigrationPositions>,
    settings: MigratorSettings,
    running: Mutex<HashMap<MigrationTarget, MigratorHandle>>,
}

#[derive(Debug, Clone, Default)]
pub struct ReplicationSyncOperationRequest {
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationSyncOperationResult {
    pub started: Vec<MigrationTarget>,
    pub stopped: Vec<MigrationTarget>,
    pub running: usize,
}

impl ReplicationSyncOperation {
    pub fn new(
        domains: Arc<ReplicationDomainCache>,
        peer: Arc<dyn PeerChannelClient>,
        insert: InsertContentOperation,
        positions: Arc<dyn MigrationPositions>,
        settings: MigratorSettings,
    ) -> Self {
        Self {
            domains,
            peer,
            insert,
            positions,
            settings,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(
        &self,
        request: ReplicationSyncOperationRequest,
    ) -> Result<ReplicationSyncOperationResult> {
        let mut running = self.running.lock().await;
        let wanted = self.wanted_targets(request.force_refresh, &running).await?;

        let mut result = ReplicationSyncOperationResult::default();

        let unwanted: Vec<MigrationTarget> = running
            .keys()
            .filter(|target| !wanted.contains_key(*target))
            .cloned()
            .collect();
        for target in unwanted {
            if let Some(handle) = running.remove(&target) {
                handle.stop().await;
                tracing::info!("Stopped replication of {} from {}", target.channel, target.domain);
                result.stopped.push(target);
            }
        }

        for (target, channel_url) in wanted {
            let alive = running
                .get(&target)
                .map(MigratorHandle::is_running)
                .unwrap_or(false);
            if alive {
                continue;
            }
            if let Some(finished) = running.remove(&target) {
                let state = finished.wait().await;
                tracing::info!(
                    "Restarting replication of {} from {} after {:?}",
                    target.channel,
                    target.domain,
                    state
                );
            }

            let migrator = ChannelMigrator::new(
                target.channel.clone(),
                channel_url,
                self.peer.clone(),
                self.insert.clone(),
                self.positions.clone(),
                self.settings.clone(),
            );
            running.insert(target.clone(), migrator.start());
            result.started.push(target);
        }

        result.running = running.len();
        Ok(result)
    }

    /// Targets currently driven by a migrator.
    pub async fn running_targets(&self) -> BTreeSet<MigrationTarget> {
        self.running.lock().await.keys().cloned().collect()
    }

    /// Stops every migrator.
    pub async fn shutdown(&self) {
        let mut running = self.running.lock().await;
        for (target, handle) in running.drain() {
            handle.stop().await;
            tracing::info!("Stopped replication of {} from {}", target.channel, target.domain);
        }
    }

    /// Resolves the peer channels to replicate, keyed by target with the peer
    /// channel url as value.
    ///
    /// A local channel has a single source: when two domains offer the same
    /// channel, the one already replicating it (or the first by name) keeps
    /// it. Domains whose channel listing fails keep their current targets.
    async fn wanted_targets(
        &self,
        force_refresh: bool,
        running: &HashMap<MigrationTarget, MigratorHandle>,
    ) -> Result<BTreeMap<MigrationTarget, String>> {
        let domains = self.domains.get_domains(force_refresh).await?;

        let mut owners: BTreeMap<String, String> = running
            .keys()
            .map(|target| (target.channel.clone(), target.domain.clone()))
            .collect();
        let mut offered: Vec<(MigrationTarget, String)> = Vec::new();

        for domain in domains.iter() {
            let channels = match self.peer.list_channels(&domain.base_url).await {
                Ok(channels) => channels,
                Err(error) => {
                    tracing::warn!(
                        "Listing channels of {} at {} failed: {}",
                        domain.domain,
                        domain.base_url,
                        error
                    );
                    for target in running.keys().filter(|t| t.domain == domain.domain) {
                        offered.push((target.clone(), domain.channel_url(&target.channel)));
                    }
                    continue;
                }
            };

            for channel in channels {
                if !domain.includes(&channel) {
                    continue;
                }
                if let Err(error) = validate_channel_name(&channel) {
                    tracing::warn!("Skipping channel of {}: {}", domain.domain, error);
                    continue;
                }
                let url = domain.channel_url(&channel);
                offered.push((MigrationTarget::new(domain.domain.clone(), channel), url));
            }
        }

        // Domains that vanished from the directory give up their channels.
        let listed: BTreeSet<&str> = domains.iter().map(|d| d.domain.as_str()).collect();
        owners.retain(|_, owner| listed.contains(owner.as_str()));

        let mut wanted = BTreeMap::new();
        for (target, url) in offered {
            let owner = owners
                .entry(target.channel.clone())
                .or_insert_with(|| target.domain.clone());
            if *owner != target.domain {
                tracing::warn!(
                    "Channel {} is already replicated from {}, ignoring {}",
                    target.channel,
                    owner,
                    target.domain
                );
                continue;
            }
            wanted.insert(target, url);
        }
        Ok(wanted)
    }
}
