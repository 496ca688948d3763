//! Operator-wide configuration.
//!
//! Read once from the environment at startup and threaded through the
//! reconciler; never mutated afterwards.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::warn;

use crate::client::{DEFAULT_REDIS_PORT, DEFAULT_SENTINEL_PORT, NodeClientConfig};

/// Default per-node timeout for checker queries.
pub const DEFAULT_NODE_TIMEOUT_SECS: u64 = 5;

/// Default resync interval after a successful pass.
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 30;

/// Default sentinel master name.
pub const DEFAULT_MASTER_NAME: &str = "mymaster";

/// Configuration shared by every reconcile pass.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Name of this operator pod (event reporter instance).
    pub pod_name: Option<String>,
    /// Namespace the operator runs in (leader lease namespace).
    pub pod_namespace: String,
    /// Restrict the watch to one namespace; cluster-wide when `None`.
    pub watch_namespace: Option<String>,
    /// Labels added to every managed object.
    pub default_labels: BTreeMap<String, String>,
    /// Annotations added to every managed object.
    pub default_annotations: BTreeMap<String, String>,
    /// Per-node query timeout during check.
    pub node_timeout: Duration,
    /// Requeue interval after a successful pass.
    pub resync_interval: Duration,
    /// Redis port on every redis pod.
    pub redis_port: u16,
    /// Sentinel port on every sentinel pod.
    pub sentinel_port: u16,
    /// Name sentinels monitor the master under.
    pub master_name: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            pod_name: None,
            pod_namespace: "default".to_string(),
            watch_namespace: None,
            default_labels: BTreeMap::new(),
            default_annotations: BTreeMap::new(),
            node_timeout: Duration::from_secs(DEFAULT_NODE_TIMEOUT_SECS),
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS),
            redis_port: DEFAULT_REDIS_PORT,
            sentinel_port: DEFAULT_SENTINEL_PORT,
            master_name: DEFAULT_MASTER_NAME.to_string(),
        }
    }
}

impl OperatorConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            pod_name: lookup("POD_NAME").filter(|s| !s.is_empty()),
            pod_namespace: lookup("POD_NAMESPACE")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.pod_namespace),
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|s| !s.is_empty()),
            default_labels: lookup("RF_DEFAULT_LABELS")
                .map(|raw| parse_label_list(&raw))
                .unwrap_or_default(),
            default_annotations: defaults.default_annotations,
            node_timeout: parse_secs(lookup("RF_NODE_TIMEOUT_SECS"), "RF_NODE_TIMEOUT_SECS")
                .unwrap_or(defaults.node_timeout),
            resync_interval: parse_secs(
                lookup("RF_RESYNC_INTERVAL_SECS"),
                "RF_RESYNC_INTERVAL_SECS",
            )
            .unwrap_or(defaults.resync_interval),
            redis_port: defaults.redis_port,
            sentinel_port: defaults.sentinel_port,
            master_name: defaults.master_name,
        }
    }

    /// Node client settings derived from this configuration.
    pub fn node_client_config(&self) -> NodeClientConfig {
        NodeClientConfig {
            redis_port: self.redis_port,
            sentinel_port: self.sentinel_port,
            master_name: self.master_name.clone(),
            connection_timeout: self.node_timeout,
            command_timeout: self.node_timeout,
        }
    }
}

fn parse_secs(raw: Option<String>, key: &str) -> Option<Duration> {
    let raw = raw?;
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => {
            warn!(key = %key, value = %raw, "Ignoring invalid duration, using default");
            None
        }
        Ok(secs) => Some(Duration::from_secs(secs)),
    }
}

/// Parse `k1=v1,k2=v2` into a label map, skipping malformed entries.
fn parse_label_list(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|entry| {
            let (k, v) = entry.split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_string(), v.trim().to_string()))
        })
        .collect()
}
