//! Observed topology of one RedisFailover instance.
//!
//! A [`Topology`] is built fresh by the checker every pass and never stored.
//! Both node lists are ordered oldest pod first (creation time, then name),
//! which is the order master election relies on.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::client::{Endpoint, RedisRole, SentinelMonitor};
use crate::resources::store::PodInfo;

/// Outcome of querying one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState<T> {
    /// The node answered.
    Live(T),
    /// Connect failure or timeout.
    Unreachable(String),
    /// The node answered with an error.
    Rejected(String),
}

impl<T> NodeState<T> {
    /// The observation, if the node answered.
    pub fn live(&self) -> Option<&T> {
        match self {
            NodeState::Live(value) => Some(value),
            NodeState::Unreachable(_) | NodeState::Rejected(_) => None,
        }
    }

    /// Check if the node answered.
    pub fn is_live(&self) -> bool {
        matches!(self, NodeState::Live(_))
    }
}

/// What a redis node reported during check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisObservation {
    /// Replication role.
    pub role: RedisRole,
    /// Applied values of the declared config parameters and credentials.
    pub config: BTreeMap<String, String>,
}

/// One redis pod and what it reported.
#[derive(Debug, Clone)]
pub struct RedisNodeView {
    pub pod: PodInfo,
    pub state: NodeState<RedisObservation>,
}

impl RedisNodeView {
    /// Pod IP.
    pub fn ip(&self) -> &str {
        &self.pod.ip
    }

    /// Reported role, if the node answered.
    pub fn role(&self) -> Option<&RedisRole> {
        self.state.live().map(|obs| &obs.role)
    }

    /// Check if the node answered and reports itself as master.
    pub fn is_master(&self) -> bool {
        self.role().is_some_and(RedisRole::is_master)
    }
}

/// One sentinel pod and what it reported.
#[derive(Debug, Clone)]
pub struct SentinelView {
    pub pod: PodInfo,
    pub state: NodeState<SentinelMonitor>,
}

impl SentinelView {
    /// Pod IP.
    pub fn ip(&self) -> &str {
        &self.pod.ip
    }

    /// Reported monitor, if the sentinel answered.
    pub fn monitor(&self) -> Option<&SentinelMonitor> {
        self.state.live()
    }
}

/// Compute the sentinel quorum for `live` sentinels: a strict majority, never
/// below one.
///
/// ```
/// use redis_failover_operator::controller::topology::quorum;
///
/// assert_eq!(quorum(1), 1);
/// assert_eq!(quorum(2), 2);
/// assert_eq!(quorum(3), 2);
/// assert_eq!(quorum(5), 3);
/// ```
pub fn quorum(live: usize) -> u32 {
    u32::try_from(live / 2 + 1).unwrap_or(u32::MAX)
}

/// Pod age order: oldest first, ties broken by name.
pub fn oldest_first(a: &PodInfo, b: &PodInfo) -> Ordering {
    a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name))
}

/// Sort pods oldest first, ties broken by name.
pub fn sort_oldest_first(pods: &mut [PodInfo]) {
    pods.sort_by(oldest_first);
}

/// Everything the checker observed in one pass.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Redis pods, oldest first.
    pub redis: Vec<RedisNodeView>,
    /// Sentinel pods, oldest first.
    pub sentinels: Vec<SentinelView>,
}

impl Topology {
    /// Build a topology, ordering both lists oldest first.
    pub fn new(mut redis: Vec<RedisNodeView>, mut sentinels: Vec<SentinelView>) -> Self {
        redis.sort_by(|a, b| oldest_first(&a.pod, &b.pod));
        sentinels.sort_by(|a, b| oldest_first(&a.pod, &b.pod));
        Self { redis, sentinels }
    }

    /// Redis nodes that answered, oldest first.
    pub fn reachable_redis(&self) -> impl Iterator<Item = &RedisNodeView> {
        self.redis.iter().filter(|n| n.state.is_live())
    }

    /// Sentinels that answered, oldest first.
    pub fn reachable_sentinels(&self) -> impl Iterator<Item = &SentinelView> {
        self.sentinels.iter().filter(|s| s.state.is_live())
    }

    /// Redis nodes reporting themselves as master, oldest first.
    pub fn masters(&self) -> Vec<&RedisNodeView> {
        self.redis.iter().filter(|n| n.is_master()).collect()
    }

    /// Oldest listed redis pod, reachable or not.
    pub fn oldest_redis(&self) -> Option<&RedisNodeView> {
        self.redis.first()
    }

    /// Look up a redis node by IP.
    pub fn redis_by_ip(&self, ip: &str) -> Option<&RedisNodeView> {
        self.redis.iter().find(|n| n.ip() == ip)
    }

    /// Look up a sentinel by IP.
    pub fn sentinel_by_ip(&self, ip: &str) -> Option<&SentinelView> {
        self.sentinels.iter().find(|s| s.ip() == ip)
    }

    /// Quorum for the sentinels that answered this pass.
    pub fn quorum(&self) -> u32 {
        quorum(self.reachable_sentinels().count())
    }

    /// The master the cluster should converge on, given what was observed.
    ///
    /// The single reported master when there is one, the oldest of several
    /// masters, or the oldest listed pod when nobody is master.
    pub fn expected_master(&self, redis_port: u16) -> Option<Endpoint> {
        let node = self
            .masters()
            .first()
            .copied()
            .or_else(|| self.oldest_redis())?;
        Some(Endpoint::new(node.ip(), redis_port))
    }
}
