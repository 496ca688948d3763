//! RedisFailover Custom Resource Definition.
//!
//! Declares a Redis master/replica set watched by a Sentinel group. The
//! operator keeps the backing workloads applied and heals the live
//! replication topology toward a single master that every sentinel monitors.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// RedisFailover is a custom resource for a Sentinel-managed Redis group.
///
/// Example:
/// ```yaml
/// apiVersion: databases.spotahome.com/v1
/// kind: RedisFailover
/// metadata:
///   name: cache
/// spec:
///   redis:
///     replicas: 3
///     customConfig:
///       - "maxmemory 100mb"
///     auth:
///       secretRef:
///         name: cache-auth
///   sentinel:
///     replicas: 3
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "databases.spotahome.com",
    version = "v1",
    kind = "RedisFailover",
    plural = "redisfailovers",
    shortname = "rf",
    status = "RedisFailoverStatus",
    namespaced,
    printcolumn = r#"{"name":"Redis", "type":"integer", "jsonPath":".spec.redis.replicas"}"#,
    printcolumn = r#"{"name":"Sentinels", "type":"integer", "jsonPath":".spec.sentinel.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisFailoverSpec {
    /// Redis data nodes.
    #[serde(default)]
    pub redis: RedisSettings,

    /// Sentinel group monitoring the redis nodes.
    #[serde(default)]
    pub sentinel: SentinelSettings,

    /// Additional labels applied to every managed object.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Additional annotations applied to every managed object.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Redis data node settings.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisSettings {
    /// Container image (default: redis:7.2-alpine).
    #[serde(default = "default_redis_image")]
    pub image: String,

    /// Number of redis pods (default: 3).
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Resource requests and limits.
    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    /// Extra `redis.conf` lines, applied live with CONFIG SET.
    /// Each line is `<parameter> <value>`.
    #[serde(default)]
    pub custom_config: Vec<String>,

    /// Overrides the container command.
    #[serde(default)]
    pub command: Vec<String>,

    /// Data volume policy.
    #[serde(default)]
    pub storage: StorageSpec,

    /// Inline password. Prefer `auth.secretRef`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Password sourced from a Secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSpec>,

    /// Tolerations for redis pods.
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            image: default_redis_image(),
            replicas: default_replicas(),
            resources: ResourceRequirementsSpec::default(),
            custom_config: Vec::new(),
            command: Vec::new(),
            storage: StorageSpec::default(),
            password: None,
            auth: None,
            tolerations: Vec::new(),
        }
    }
}

/// Sentinel settings.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SentinelSettings {
    /// Container image (default: redis:7.2-alpine).
    #[serde(default = "default_redis_image")]
    pub image: String,

    /// Number of sentinel pods (default: 3).
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Resource requests and limits.
    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    /// Extra monitor settings applied with `SENTINEL SET`.
    /// Each line is `<parameter> <value>`, e.g. `down-after-milliseconds 2000`.
    #[serde(default)]
    pub custom_config: Vec<String>,

    /// Overrides the container command.
    #[serde(default)]
    pub command: Vec<String>,

    /// Tolerations for sentinel pods.
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

impl Default for SentinelSettings {
    fn default() -> Self {
        Self {
            image: default_redis_image(),
            replicas: default_replicas(),
            resources: ResourceRequirementsSpec::default(),
            custom_config: Vec::new(),
            command: Vec::new(),
            tolerations: Vec::new(),
        }
    }
}

fn default_redis_image() -> String {
    "redis:7.2-alpine".to_string()
}

fn default_replicas() -> i32 {
    3
}

/// Authentication configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    /// Reference to a Secret containing the password.
    pub secret_ref: SecretKeyRef,
}

/// Reference to a key within a Secret.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Name of the Secret.
    pub name: String,

    /// Key within the Secret containing the password (default: password).
    #[serde(default = "default_password_key")]
    pub key: String,
}

fn default_password_key() -> String {
    "password".to_string()
}

/// Storage policy for redis data.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Keep persistent volume claims when the RedisFailover is deleted.
    #[serde(default)]
    pub keep_after_deletion: bool,

    /// emptyDir settings, used when no claim is declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirSpec>,

    /// Persistent volume claim template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PersistentVolumeClaimSpec>,
}

/// emptyDir volume settings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmptyDirSpec {
    /// Storage medium ("" or "Memory").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,

    /// Size limit (e.g. 1Gi).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_limit: Option<String>,
}

/// Persistent volume claim template for redis data.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimSpec {
    /// Claim name used as the volume name (default: redis-data).
    #[serde(default = "default_claim_name")]
    pub name: String,

    /// Requested size (default: 1Gi).
    #[serde(default = "default_claim_size")]
    pub size: String,

    /// Storage class; cluster default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Access modes (default: ReadWriteOnce).
    #[serde(default = "default_access_modes")]
    pub access_modes: Vec<String>,
}

impl Default for PersistentVolumeClaimSpec {
    fn default() -> Self {
        Self {
            name: default_claim_name(),
            size: default_claim_size(),
            storage_class_name: None,
            access_modes: default_access_modes(),
        }
    }
}

fn default_claim_name() -> String {
    "redis-data".to_string()
}

fn default_claim_size() -> String {
    "1Gi".to_string()
}

fn default_access_modes() -> Vec<String> {
    vec!["ReadWriteOnce".to_string()]
}

/// Resource requests and limits.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    /// CPU and memory requests.
    #[serde(default)]
    pub requests: ResourceSpec,

    /// CPU and memory limits.
    #[serde(default)]
    pub limits: ResourceSpec,
}

/// CPU and memory quantities. Unset values are omitted from the pod spec.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// CPU quantity (e.g. 100m).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    /// Memory quantity (e.g. 256Mi).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Toleration for pod scheduling.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    /// Toleration key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Toleration operator (Equal or Exists).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    /// Toleration value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Toleration effect (NoSchedule, PreferNoSchedule, or NoExecute).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,

    /// Toleration seconds (for NoExecute effect).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

/// Observed state of a RedisFailover.
///
/// Written once per successful pass and always replaced as a whole.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisFailoverStatus {
    /// Reachable redis nodes, oldest pod first.
    #[serde(default)]
    pub redis_nodes: Vec<RedisNode>,

    /// Reachable sentinel nodes, oldest pod first.
    #[serde(default)]
    pub sentinel_nodes: Vec<SentinelNode>,
}

/// A redis node as reported in status.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct RedisNode {
    #[serde(rename = "podIP")]
    pub pod_ip: String,
    #[serde(rename = "hostIP")]
    pub host_ip: String,
    #[serde(rename = "isMaster")]
    pub is_master: bool,
}

/// A sentinel node as reported in status.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct SentinelNode {
    #[serde(rename = "podIP")]
    pub pod_ip: String,
    #[serde(rename = "hostIP")]
    pub host_ip: String,
}

impl RedisFailoverSpec {
    /// Password declared for the redis nodes, either inline or resolved later
    /// from `auth.secretRef`.
    pub fn inline_password(&self) -> Option<&str> {
        self.redis.password.as_deref().filter(|p| !p.is_empty())
    }
}
