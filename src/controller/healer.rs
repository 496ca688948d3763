//! Corrective operations against live nodes.
//!
//! Each operation targets specific nodes, is safe to repeat against a node
//! that is already converged, and returns the first node error it hits.
//! Every command actually issued is recorded as a [`HealAction`] so the
//! reconciler can emit events and metrics for it.

use tracing::{info, warn};

use crate::client::parsing::merged_config_lines;
use crate::client::{Endpoint, NodeClient};
use crate::controller::error::Result;
use crate::controller::topology::Topology;

/// A corrective command that was issued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealAction {
    PromotedMaster { ip: String },
    RepointedReplica { ip: String, master: String },
    RestoredSentinel { ip: String },
    MonitoredMaster {
        ip: String,
        master: Endpoint,
        quorum: u32,
    },
    AppliedRedisConfig { ip: String },
    AppliedSentinelConfig { ip: String },
}

impl HealAction {
    /// Metric label for this action.
    pub fn kind(&self) -> &'static str {
        match self {
            HealAction::PromotedMaster { .. } => "promote_master",
            HealAction::RepointedReplica { .. } => "repoint_replica",
            HealAction::RestoredSentinel { .. } => "restore_sentinel",
            HealAction::MonitoredMaster { .. } => "monitor_master",
            HealAction::AppliedRedisConfig { .. } => "redis_config",
            HealAction::AppliedSentinelConfig { .. } => "sentinel_config",
        }
    }

    /// Event reason for this action.
    pub fn reason(&self) -> &'static str {
        match self {
            HealAction::PromotedMaster { .. } => "MasterPromoted",
            HealAction::RepointedReplica { .. } => "ReplicaRepointed",
            HealAction::RestoredSentinel { .. } => "SentinelReset",
            HealAction::MonitoredMaster { .. } => "SentinelMonitorSet",
            HealAction::AppliedRedisConfig { .. } => "RedisConfigApplied",
            HealAction::AppliedSentinelConfig { .. } => "SentinelConfigApplied",
        }
    }
}

impl std::fmt::Display for HealAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealAction::PromotedMaster { ip } => write!(f, "promoted {} to master", ip),
            HealAction::RepointedReplica { ip, master } => {
                write!(f, "pointed {} at master {}", ip, master)
            }
            HealAction::RestoredSentinel { ip } => write!(f, "reset sentinel {}", ip),
            HealAction::MonitoredMaster { ip, master, quorum } => write!(
                f,
                "sentinel {} now monitors {} with quorum {}",
                ip, master, quorum
            ),
            HealAction::AppliedRedisConfig { ip } => write!(f, "applied redis config to {}", ip),
            HealAction::AppliedSentinelConfig { ip } => {
                write!(f, "applied sentinel config to {}", ip)
            }
        }
    }
}

/// Issues corrective commands for one pass.
pub struct Healer<'a> {
    nodes: &'a dyn NodeClient,
    password: Option<&'a str>,
    redis_port: u16,
    actions: Vec<HealAction>,
}

impl<'a> Healer<'a> {
    pub fn new(nodes: &'a dyn NodeClient, password: Option<&'a str>, redis_port: u16) -> Self {
        Self {
            nodes,
            password,
            redis_port,
            actions: Vec::new(),
        }
    }

    /// Commands issued so far.
    pub fn actions(&self) -> &[HealAction] {
        &self.actions
    }

    /// Consume the healer, returning the commands it issued.
    pub fn into_actions(self) -> Vec<HealAction> {
        self.actions
    }

    /// Promote `ip` to master.
    pub async fn make_master(&mut self, ip: &str) -> Result<()> {
        self.nodes.make_master(ip, self.password).await?;
        info!(ip = %ip, "Promoted redis node to master");
        self.actions.push(HealAction::PromotedMaster { ip: ip.to_string() });
        Ok(())
    }

    /// Promote the oldest redis pod and point every other reachable node at it.
    ///
    /// The oldest pod is promoted even when it did not answer the check; the
    /// resulting error fails the pass. Returns the new master's IP, or `None`
    /// when no redis pod is running.
    pub async fn set_oldest_as_master(&mut self, topology: &Topology) -> Result<Option<String>> {
        let Some(oldest) = topology.oldest_redis() else {
            return Ok(None);
        };
        let master_ip = oldest.ip().to_string();
        info!(ip = %master_ip, pod = %oldest.pod.name, "Electing oldest redis pod as master");

        self.make_master(&master_ip).await?;
        self.repoint_others(&master_ip, topology).await?;
        Ok(Some(master_ip))
    }

    /// Make sure `master_ip` is master and every other reachable node follows it.
    pub async fn set_master_on_all(&mut self, master_ip: &str, topology: &Topology) -> Result<()> {
        let already_master = topology
            .redis_by_ip(master_ip)
            .is_some_and(|node| node.is_master());
        if !already_master {
            self.make_master(master_ip).await?;
        }
        self.repoint_others(master_ip, topology).await
    }

    async fn repoint_others(&mut self, master_ip: &str, topology: &Topology) -> Result<()> {
        let endpoint = Endpoint::new(master_ip, self.redis_port);

        for node in topology.redis.iter().filter(|n| n.ip() != master_ip) {
            let Some(role) = node.role() else {
                warn!(
                    ip = %node.ip(),
                    master = %master_ip,
                    "Skipping unreachable redis node; it may still act as master until it rejoins"
                );
                continue;
            };
            if role.follows(&endpoint) {
                continue;
            }
            self.nodes
                .make_replica_of(node.ip(), master_ip, self.password)
                .await?;
            info!(ip = %node.ip(), master = %master_ip, previous = %role, "Re-pointed redis node");
            self.actions.push(HealAction::RepointedReplica {
                ip: node.ip().to_string(),
                master: master_ip.to_string(),
            });
        }
        Ok(())
    }

    /// Point sentinel `ip` at `master` with `quorum`, unless it already is.
    pub async fn new_sentinel_monitor(
        &mut self,
        ip: &str,
        master: &Endpoint,
        quorum: u32,
    ) -> Result<()> {
        let current = self.nodes.get_sentinel_monitor(ip).await?;
        if current.monitors(master, quorum) {
            return Ok(());
        }

        self.nodes
            .monitor_master(ip, master, quorum, self.password)
            .await?;
        info!(ip = %ip, master = %master, quorum, "Sentinel monitor set");
        self.actions.push(HealAction::MonitoredMaster {
            ip: ip.to_string(),
            master: master.clone(),
            quorum,
        });
        Ok(())
    }

    /// Drop the cached peers and replicas of sentinel `ip`.
    pub async fn restore_sentinel(&mut self, ip: &str) -> Result<()> {
        self.nodes.reset_sentinel(ip).await?;
        info!(ip = %ip, "Sentinel reset");
        self.actions.push(HealAction::RestoredSentinel { ip: ip.to_string() });
        Ok(())
    }

    /// Push the declared custom config, plus the credential, to redis `ip`.
    pub async fn set_redis_custom_config(&mut self, ip: &str, declared: &[String]) -> Result<()> {
        let mut lines = merged_config_lines(declared);
        if let Some(password) = self.password {
            lines.push(format!("requirepass {}", password));
            lines.push(format!("masterauth {}", password));
        }
        if lines.is_empty() {
            return Ok(());
        }

        self.nodes
            .set_redis_custom_config(ip, self.password, &lines)
            .await?;
        info!(ip = %ip, lines = lines.len(), "Applied redis config");
        self.actions.push(HealAction::AppliedRedisConfig { ip: ip.to_string() });
        Ok(())
    }

    /// Push the declared custom config to sentinel `ip`.
    pub async fn set_sentinel_custom_config(&mut self, ip: &str, declared: &[String]) -> Result<()> {
        let lines = merged_config_lines(declared);
        if lines.is_empty() {
            return Ok(());
        }

        self.nodes.set_sentinel_custom_config(ip, &lines).await?;
        info!(ip = %ip, lines = lines.len(), "Applied sentinel config");
        self.actions
            .push(HealAction::AppliedSentinelConfig { ip: ip.to_string() });
        Ok(())
    }
}
