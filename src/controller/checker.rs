//! Live topology inspection.
//!
//! The checker lists the running pods of an instance, queries every node
//! concurrently under a per-node timeout and classifies what it saw into a
//! closed set of [`Discrepancy`] values. It never changes anything.
//!
//! A node that cannot be reached is kept in the topology as unreachable and
//! reported as [`Discrepancy::NodeUnreachable`]; only a failed pod listing is
//! a hard error.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::client::parsing::{canonical_lines, render_applied_lines, split_config_line};
use crate::client::{Endpoint, NodeClient, NodeError, SentinelMonitor};
use crate::controller::error::Result;
use crate::controller::topology::{
    NodeState, RedisNodeView, RedisObservation, SentinelView, Topology,
};
use crate::crd::RedisFailover;
use crate::resources::common::{
    REDIS_COMPONENT, SENTINEL_COMPONENT, selector_labels, selector_string,
};
use crate::resources::store::{ObjectKey, ObjectStore};

/// Redis parameters carrying the credential.
pub const CREDENTIAL_PARAMS: [&str; 2] = ["requirepass", "masterauth"];

/// Which role a node plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Redis,
    Sentinel,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Redis => f.write_str("redis"),
            NodeKind::Sentinel => f.write_str("sentinel"),
        }
    }
}

/// Reconciler stage that handles a discrepancy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Escalated before any healing.
    Fatal,
    /// Master election and replica re-pointing.
    Master,
    /// Sentinel restore and re-monitor.
    Sentinel,
    /// Config and credential push.
    Config,
    /// Recorded only.
    Observed,
}

/// Something the checker found that differs from the declared state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Discrepancy {
    /// No reachable redis node is master.
    NoMaster,
    /// More than one reachable redis node is master, oldest first.
    MultipleMasters { masters: Vec<String> },
    /// A replica follows an address other than the single master.
    ReplicaMisrouted { ip: String },
    /// A sentinel monitors the wrong master or uses the wrong quorum.
    SentinelMisconfigured { ip: String },
    /// A sentinel remembers more peers or replicas than are running.
    SentinelNeedsReset { ip: String },
    /// Applied config or credential differs from the declared one.
    ConfigDrift { kind: NodeKind, ip: String },
    /// The node did not answer in time.
    NodeUnreachable { kind: NodeKind, ip: String },
    /// The node answered with an error.
    CommandRejected {
        kind: NodeKind,
        ip: String,
        reason: String,
    },
}

impl Discrepancy {
    /// The stage that handles this discrepancy.
    pub fn stage(&self) -> Stage {
        match self {
            Discrepancy::CommandRejected { .. } => Stage::Fatal,
            Discrepancy::NoMaster
            | Discrepancy::MultipleMasters { .. }
            | Discrepancy::ReplicaMisrouted { .. } => Stage::Master,
            Discrepancy::SentinelMisconfigured { .. } | Discrepancy::SentinelNeedsReset { .. } => {
                Stage::Sentinel
            }
            Discrepancy::ConfigDrift { .. } => Stage::Config,
            Discrepancy::NodeUnreachable { .. } => Stage::Observed,
        }
    }

    /// Short label for logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Discrepancy::NoMaster => "no_master",
            Discrepancy::MultipleMasters { .. } => "multiple_masters",
            Discrepancy::ReplicaMisrouted { .. } => "replica_misrouted",
            Discrepancy::SentinelMisconfigured { .. } => "sentinel_misconfigured",
            Discrepancy::SentinelNeedsReset { .. } => "sentinel_needs_reset",
            Discrepancy::ConfigDrift { .. } => "config_drift",
            Discrepancy::NodeUnreachable { .. } => "node_unreachable",
            Discrepancy::CommandRejected { .. } => "command_rejected",
        }
    }
}

impl std::fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Discrepancy::NoMaster => write!(f, "no redis node is master"),
            Discrepancy::MultipleMasters { masters } => {
                write!(f, "multiple masters: {}", masters.join(", "))
            }
            Discrepancy::ReplicaMisrouted { ip } => {
                write!(f, "replica {} follows the wrong master", ip)
            }
            Discrepancy::SentinelMisconfigured { ip } => {
                write!(f, "sentinel {} monitors the wrong master or quorum", ip)
            }
            Discrepancy::SentinelNeedsReset { ip } => {
                write!(f, "sentinel {} remembers stale peers", ip)
            }
            Discrepancy::ConfigDrift { kind, ip } => write!(f, "{} {} config drifted", kind, ip),
            Discrepancy::NodeUnreachable { kind, ip } => write!(f, "{} {} unreachable", kind, ip),
            Discrepancy::CommandRejected { kind, ip, reason } => {
                write!(f, "{} {} rejected a query: {}", kind, ip, reason)
            }
        }
    }
}

/// Redis parameters read back during check, in declaration order.
pub fn observed_redis_params(failover: &RedisFailover, password: Option<&str>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut params: Vec<String> = failover
        .spec
        .redis
        .custom_config
        .iter()
        .filter_map(|line| split_config_line(line))
        .map(|(param, _)| param)
        .filter(|param| seen.insert(param.clone()))
        .collect();
    if password.is_some() {
        params.extend(
            CREDENTIAL_PARAMS
                .iter()
                .filter(|p| seen.insert((*p).to_string()))
                .map(|p| (*p).to_string()),
        );
    }
    params
}

/// Inspects one instance.
pub struct Checker<'a> {
    nodes: &'a dyn NodeClient,
    store: &'a dyn ObjectStore,
    timeout: Duration,
    redis_port: u16,
}

impl<'a> Checker<'a> {
    /// Create a checker querying nodes through `nodes` with a per-node `timeout`.
    pub fn new(
        nodes: &'a dyn NodeClient,
        store: &'a dyn ObjectStore,
        timeout: Duration,
        redis_port: u16,
    ) -> Self {
        Self {
            nodes,
            store,
            timeout,
            redis_port,
        }
    }

    /// Observe the instance and classify what differs from the declared state.
    pub async fn check(
        &self,
        failover: &RedisFailover,
        password: Option<&str>,
    ) -> Result<(Topology, Vec<Discrepancy>)> {
        let key = ObjectKey::of(failover);
        let redis_selector = selector_string(&selector_labels(failover, REDIS_COMPONENT));
        let sentinel_selector = selector_string(&selector_labels(failover, SENTINEL_COMPONENT));

        let redis_pods = self.store.list_pods(&key.namespace, &redis_selector).await?;
        let sentinel_pods = self
            .store
            .list_pods(&key.namespace, &sentinel_selector)
            .await?;

        let params = observed_redis_params(failover, password);
        let redis = join_all(redis_pods.into_iter().map(|pod| {
            let params = &params;
            async move {
                let state = self
                    .bounded(&pod.ip, self.observe_redis(&pod.ip, password, params))
                    .await;
                RedisNodeView { pod, state }
            }
        }));
        let sentinels = join_all(sentinel_pods.into_iter().map(|pod| async move {
            let ip = pod.ip.clone();
            let state = self
                .bounded(&ip, self.nodes.get_sentinel_monitor(&ip))
                .await;
            SentinelView { pod, state }
        }));
        let (redis, sentinels) = futures::join!(redis, sentinels);

        let topology = Topology::new(redis, sentinels);
        let discrepancies = classify(&topology, failover, password, self.redis_port);

        debug!(
            name = %key,
            redis = topology.redis.len(),
            sentinels = topology.sentinels.len(),
            discrepancies = discrepancies.len(),
            "Checked topology"
        );
        Ok((topology, discrepancies))
    }

    /// Role plus the watched config of one redis node. The caller bounds
    /// both queries with a single timeout.
    async fn observe_redis(
        &self,
        ip: &str,
        password: Option<&str>,
        params: &[String],
    ) -> std::result::Result<RedisObservation, NodeError> {
        let role = self.nodes.get_role(ip, password).await?;
        let config = if params.is_empty() {
            Default::default()
        } else {
            self.nodes.get_redis_config(ip, password, params).await?
        };
        Ok(RedisObservation { role, config })
    }

    /// Run one node query under the per-node timeout.
    pub async fn bounded<T, F>(&self, ip: &str, query: F) -> NodeState<T>
    where
        F: Future<Output = std::result::Result<T, NodeError>>,
    {
        match tokio::time::timeout(self.timeout, query).await {
            Ok(Ok(value)) => NodeState::Live(value),
            Ok(Err(NodeError::Rejected {
                command, reason, ..
            })) => {
                warn!(ip = %ip, command = %command, reason = %reason, "Node rejected query");
                NodeState::Rejected(format!("{}: {}", command, reason))
            }
            Ok(Err(e)) => {
                warn!(ip = %ip, error = %e, "Node unreachable");
                NodeState::Unreachable(e.to_string())
            }
            Err(_) => {
                warn!(ip = %ip, timeout = ?self.timeout, "Node query timed out");
                NodeState::Unreachable(format!("timed out after {:?}", self.timeout))
            }
        }
    }
}

/// Classify an observed topology against the declared state.
///
/// Order of the result: unreachable and rejected nodes, master problems,
/// sentinel problems, then config drift.
pub fn classify(
    topology: &Topology,
    failover: &RedisFailover,
    password: Option<&str>,
    redis_port: u16,
) -> Vec<Discrepancy> {
    let mut found = Vec::new();

    for node in &topology.redis {
        if let Some(d) = node_failure(NodeKind::Redis, node.ip(), &node.state) {
            found.push(d);
        }
    }
    for sentinel in &topology.sentinels {
        if let Some(d) = node_failure(NodeKind::Sentinel, sentinel.ip(), &sentinel.state) {
            found.push(d);
        }
    }

    found.extend(classify_masters(topology, redis_port));

    if let Some(master) = topology.expected_master(redis_port) {
        found.extend(classify_sentinels(
            topology,
            &master,
            topology.quorum(),
            topology.sentinels.len(),
            topology.redis.len(),
        ));
    }

    let redis_lines = &failover.spec.redis.custom_config;
    for node in topology.reachable_redis() {
        if let Some(obs) = node.state.live()
            && redis_drifted(redis_lines, &obs.config, password)
        {
            found.push(Discrepancy::ConfigDrift {
                kind: NodeKind::Redis,
                ip: node.ip().to_string(),
            });
        }
    }

    let sentinel_lines = &failover.spec.sentinel.custom_config;
    if !sentinel_lines.is_empty() {
        for sentinel in topology.reachable_sentinels() {
            if let Some(monitor) = sentinel.monitor()
                && lines_drifted(sentinel_lines, &monitor.settings)
            {
                found.push(Discrepancy::ConfigDrift {
                    kind: NodeKind::Sentinel,
                    ip: sentinel.ip().to_string(),
                });
            }
        }
    }

    found
}

fn node_failure<T>(kind: NodeKind, ip: &str, state: &NodeState<T>) -> Option<Discrepancy> {
    match state {
        NodeState::Live(_) => None,
        NodeState::Unreachable(_) => Some(Discrepancy::NodeUnreachable {
            kind,
            ip: ip.to_string(),
        }),
        NodeState::Rejected(reason) => Some(Discrepancy::CommandRejected {
            kind,
            ip: ip.to_string(),
            reason: reason.clone(),
        }),
    }
}

/// Master-count and replica-routing discrepancies.
///
/// Nothing is reported while no redis pod is running.
pub fn classify_masters(topology: &Topology, redis_port: u16) -> Vec<Discrepancy> {
    if topology.redis.is_empty() {
        return Vec::new();
    }

    let masters = topology.masters();
    match masters.as_slice() {
        [] => vec![Discrepancy::NoMaster],
        [master] => {
            let endpoint = Endpoint::new(master.ip(), redis_port);
            topology
                .reachable_redis()
                .filter(|n| n.ip() != master.ip())
                .filter(|n| n.role().is_some_and(|role| !role.follows(&endpoint)))
                .map(|n| Discrepancy::ReplicaMisrouted {
                    ip: n.ip().to_string(),
                })
                .collect()
        }
        many => vec![Discrepancy::MultipleMasters {
            masters: many.iter().map(|n| n.ip().to_string()).collect(),
        }],
    }
}

/// Sentinel discrepancies against the master the cluster converges on.
///
/// A sentinel is misconfigured when it does not monitor `master` with
/// `quorum`, and stale when it knows more sentinels than `listed_sentinels`
/// or more replicas than `listed_redis - 1`.
pub fn classify_sentinels(
    topology: &Topology,
    master: &Endpoint,
    quorum: u32,
    listed_sentinels: usize,
    listed_redis: usize,
) -> Vec<Discrepancy> {
    let max_sentinels = u32::try_from(listed_sentinels).unwrap_or(u32::MAX);
    let max_replicas = u32::try_from(listed_redis.saturating_sub(1)).unwrap_or(u32::MAX);

    let mut found = Vec::new();
    for sentinel in topology.reachable_sentinels() {
        let Some(monitor) = sentinel.monitor() else {
            continue;
        };
        let ip = sentinel.ip().to_string();
        if !monitor.monitors(master, quorum) {
            found.push(Discrepancy::SentinelMisconfigured { ip: ip.clone() });
        }
        if is_stale(monitor, max_sentinels, max_replicas) {
            found.push(Discrepancy::SentinelNeedsReset { ip });
        }
    }
    found
}

fn is_stale(monitor: &SentinelMonitor, max_sentinels: u32, max_replicas: u32) -> bool {
    monitor.master.is_some()
        && (monitor.known_sentinels > max_sentinels || monitor.known_replicas > max_replicas)
}

/// Check applied redis config and credential against the declared ones.
pub fn redis_drifted(
    declared: &[String],
    applied: &std::collections::BTreeMap<String, String>,
    password: Option<&str>,
) -> bool {
    if lines_drifted(declared, applied) {
        return true;
    }
    match password {
        Some(password) => CREDENTIAL_PARAMS
            .iter()
            .any(|param| applied.get(*param).map(String::as_str) != Some(password)),
        None => false,
    }
}

fn lines_drifted(declared: &[String], applied: &std::collections::BTreeMap<String, String>) -> bool {
    render_applied_lines(declared, applied) != canonical_lines(declared)
}
