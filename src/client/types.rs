//! Runtime observations returned by redis and sentinel nodes.

use std::collections::BTreeMap;

/// Default redis client port.
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Default sentinel port.
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;

/// A network endpoint (IP address and port).
///
/// # Examples
///
/// ```
/// use redis_failover_operator::client::Endpoint;
///
/// let endpoint = Endpoint::new("10.0.0.5", 6379);
/// assert_eq!(endpoint.ip(), "10.0.0.5");
/// assert_eq!(endpoint.port(), 6379);
/// assert_eq!(endpoint.to_string(), "10.0.0.5:6379");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    ip: String,
    port: u16,
}

impl Endpoint {
    /// Create a new endpoint with the given IP and port.
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// Create an endpoint on the default redis port (6379).
    pub fn redis(ip: impl Into<String>) -> Self {
        Self::new(ip, DEFAULT_REDIS_PORT)
    }

    /// Get the IP address.
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Get the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Check if this endpoint matches the given IP (port-agnostic comparison).
    pub fn has_ip(&self, ip: &str) -> bool {
        self.ip == ip
    }

    /// Parse an endpoint from an address string like "10.0.0.5:6379".
    pub fn parse(address: &str) -> Option<Self> {
        let (ip, port_str) = address.rsplit_once(':')?;
        let port = port_str.parse().ok()?;
        if ip.is_empty() {
            return None;
        }
        Some(Self::new(ip, port))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<(&str, u16)> for Endpoint {
    fn from((ip, port): (&str, u16)) -> Self {
        Self::new(ip, port)
    }
}

/// Replication role reported by a redis node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisRole {
    /// Accepts writes.
    Master,
    /// Follows `master`, or nothing if the link target was not reported.
    Replica { master: Option<Endpoint> },
}

impl RedisRole {
    /// Check if the node is a master.
    pub fn is_master(&self) -> bool {
        matches!(self, RedisRole::Master)
    }

    /// Check if the node replicates from the given endpoint.
    pub fn follows(&self, master: &Endpoint) -> bool {
        matches!(self, RedisRole::Replica { master: Some(m) } if m == master)
    }
}

impl std::fmt::Display for RedisRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RedisRole::Master => write!(f, "master"),
            RedisRole::Replica { master: Some(m) } => write!(f, "replica of {}", m),
            RedisRole::Replica { master: None } => write!(f, "replica"),
        }
    }
}

/// What a sentinel reports about the monitored master.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentinelMonitor {
    /// Monitored master address, `None` when nothing is monitored.
    pub master: Option<Endpoint>,
    /// Configured quorum.
    pub quorum: u32,
    /// Sentinels this sentinel knows about, itself included.
    pub known_sentinels: u32,
    /// Replicas this sentinel knows about.
    pub known_replicas: u32,
    /// Remaining monitor settings (`down-after-milliseconds`, ...).
    pub settings: BTreeMap<String, String>,
}

impl SentinelMonitor {
    /// A sentinel with no master configured.
    pub fn unmonitored() -> Self {
        Self::default()
    }

    /// Check if this sentinel monitors `master` with the given quorum.
    pub fn monitors(&self, master: &Endpoint, quorum: u32) -> bool {
        self.master.as_ref() == Some(master) && self.quorum == quorum
    }
}
