//! Common resource generation utilities.
//!
//! Names, labels, selectors and owner references shared by every object the
//! operator manages for a RedisFailover.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

use crate::crd::RedisFailover;

/// Value of `app.kubernetes.io/managed-by` on every managed object.
pub const MANAGED_BY: &str = "redis-failover-operator";

/// Label carrying the owning instance name.
pub const INSTANCE_LABEL: &str = "redisfailovers.databases.spotahome.com/name";

/// Value of `app.kubernetes.io/part-of` on every managed pod.
pub const PART_OF: &str = "redis-failover";

/// Redis component label value.
pub const REDIS_COMPONENT: &str = "redis";

/// Sentinel component label value.
pub const SENTINEL_COMPONENT: &str = "sentinel";

/// Name of redis objects (StatefulSet, Service, ConfigMap, PDB).
pub fn redis_name(resource: &RedisFailover) -> String {
    format!("rfr-{}", resource.name_any())
}

/// Name of sentinel objects (Deployment, Service, ConfigMap, PDB).
pub fn sentinel_name(resource: &RedisFailover) -> String {
    format!("rfs-{}", resource.name_any())
}

/// Name of the redis shutdown script ConfigMap.
pub fn redis_shutdown_name(resource: &RedisFailover) -> String {
    format!("rfr-s-{}", resource.name_any())
}

/// Labels applied to all managed objects.
///
/// Operator defaults first, then the instance labels, then the resource's own
/// labels. Later sources win on conflicting keys.
pub fn standard_labels(
    resource: &RedisFailover,
    defaults: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = defaults.clone();
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );
    labels.insert(INSTANCE_LABEL.to_string(), resource.name_any());

    // Merge user-defined labels
    for (key, value) in &resource.spec.labels {
        labels.insert(key.clone(), value.clone());
    }

    labels
}

/// Annotations applied to all managed objects.
pub fn standard_annotations(
    resource: &RedisFailover,
    defaults: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut annotations = defaults.clone();
    for (key, value) in &resource.spec.annotations {
        annotations.insert(key.clone(), value.clone());
    }
    annotations
}

/// Selector labels identifying the pods of one component.
pub fn selector_labels(resource: &RedisFailover, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        component.to_string(),
    );
    labels.insert("app.kubernetes.io/name".to_string(), resource.name_any());
    labels.insert("app.kubernetes.io/part-of".to_string(), PART_OF.to_string());
    labels
}

/// Render labels as a `k=v,k=v` selector string.
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Selector matching every object labelled for this instance.
pub fn instance_selector(resource: &RedisFailover) -> String {
    format!("{}={}", INSTANCE_LABEL, resource.name_any())
}

/// Object labels for one component: standard labels plus its selector labels.
pub fn component_labels(
    resource: &RedisFailover,
    defaults: &BTreeMap<String, String>,
    component: &str,
) -> BTreeMap<String, String> {
    let mut labels = standard_labels(resource, defaults);
    labels.extend(selector_labels(resource, component));
    labels
}

/// Create owner reference for a RedisFailover
pub fn owner_reference(resource: &RedisFailover) -> OwnerReference {
    OwnerReference {
        api_version: RedisFailover::api_version(&()).to_string(),
        kind: RedisFailover::kind(&()).to_string(),
        name: resource.name_any(),
        uid: resource.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// `None` for empty maps so applied objects stay minimal.
pub fn non_empty(map: BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    if map.is_empty() { None } else { Some(map) }
}
