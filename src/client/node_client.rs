//! The command contract against individual redis and sentinel nodes.
//!
//! The controller only talks to nodes through [`NodeClient`], so the checker
//! and healer can be driven against an in-memory cluster in tests.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::types::{Endpoint, RedisRole, SentinelMonitor};

/// Errors returned by a single node command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("node {ip} unreachable: {reason}")]
    Unreachable { ip: String, reason: String },

    #[error("node {ip} timed out after {duration:?}")]
    Timeout { ip: String, duration: Duration },

    #[error("node {ip} rejected {command}: {reason}")]
    Rejected {
        ip: String,
        command: String,
        reason: String,
    },
}

impl NodeError {
    /// Check if the node could not be reached at all (connect failure or timeout).
    pub fn is_unreachable(&self) -> bool {
        matches!(self, NodeError::Unreachable { .. } | NodeError::Timeout { .. })
    }

    /// The node the error refers to.
    pub fn ip(&self) -> &str {
        match self {
            NodeError::Unreachable { ip, .. }
            | NodeError::Timeout { ip, .. }
            | NodeError::Rejected { ip, .. } => ip,
        }
    }
}

/// Commands and queries issued against one node at a time.
///
/// Every method targets exactly one node and returns that node's error; no
/// method retries. Redis methods take the declared credential, sentinels run
/// without auth.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Read the replication role of a redis node.
    async fn get_role(&self, ip: &str, password: Option<&str>) -> Result<RedisRole, NodeError>;

    /// Read the applied values of `params` on a redis node.
    async fn get_redis_config(
        &self,
        ip: &str,
        password: Option<&str>,
        params: &[String],
    ) -> Result<BTreeMap<String, String>, NodeError>;

    /// Promote a redis node to master.
    async fn make_master(&self, ip: &str, password: Option<&str>) -> Result<(), NodeError>;

    /// Point a redis node at `master_ip`.
    async fn make_replica_of(
        &self,
        ip: &str,
        master_ip: &str,
        password: Option<&str>,
    ) -> Result<(), NodeError>;

    /// Apply `param value` lines to a redis node with `CONFIG SET`.
    async fn set_redis_custom_config(
        &self,
        ip: &str,
        password: Option<&str>,
        lines: &[String],
    ) -> Result<(), NodeError>;

    /// Read what a sentinel monitors.
    async fn get_sentinel_monitor(&self, ip: &str) -> Result<SentinelMonitor, NodeError>;

    /// Replace the sentinel's monitor with `master` and `quorum`.
    async fn monitor_master(
        &self,
        ip: &str,
        master: &Endpoint,
        quorum: u32,
        password: Option<&str>,
    ) -> Result<(), NodeError>;

    /// Drop the sentinel's cached peers and replicas.
    async fn reset_sentinel(&self, ip: &str) -> Result<(), NodeError>;

    /// Apply `param value` lines to the sentinel's monitor with `SENTINEL SET`.
    async fn set_sentinel_custom_config(&self, ip: &str, lines: &[String])
    -> Result<(), NodeError>;
}

/// Per-node timeouts for [`super::RedisNodeClient`].
#[derive(Clone, Debug)]
pub struct NodeClientConfig {
    /// Redis port on every redis pod.
    pub redis_port: u16,
    /// Sentinel port on every sentinel pod.
    pub sentinel_port: u16,
    /// Name the sentinels monitor the master under.
    pub master_name: String,
    /// Connection timeout.
    pub connection_timeout: Duration,
    /// Command timeout.
    pub command_timeout: Duration,
}

impl Default for NodeClientConfig {
    fn default() -> Self {
        Self {
            redis_port: super::types::DEFAULT_REDIS_PORT,
            sentinel_port: super::types::DEFAULT_SENTINEL_PORT,
            master_name: "mymaster".to_string(),
            connection_timeout: Duration::from_secs(3),
            command_timeout: Duration::from_secs(5),
        }
    }
}
