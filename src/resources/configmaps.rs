//! ConfigMap generation for RedisFailover instances.
//!
//! - `rfs-<name>`: `sentinel.conf`, copied into a writable volume at start
//! - `rfr-<name>`: `redis.conf`
//! - `rfr-s-<name>`: `shutdown.sh`, run as the redis preStop hook

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::controller::topology::quorum;
use crate::crd::RedisFailover;
use crate::resources::common::{
    REDIS_COMPONENT, SENTINEL_COMPONENT, component_labels, non_empty, owner_reference,
    redis_name, redis_shutdown_name, sentinel_name, standard_annotations,
};

/// Key of the sentinel config file in its ConfigMap.
pub const SENTINEL_CONFIG_FILE: &str = "sentinel.conf";
/// Key of the redis config file in its ConfigMap.
pub const REDIS_CONFIG_FILE: &str = "redis.conf";
/// Key of the shutdown script in its ConfigMap.
pub const SHUTDOWN_SCRIPT_FILE: &str = "shutdown.sh";

/// Render `sentinel.conf`.
///
/// The monitor points at a placeholder address until the healer re-points
/// it at the real master.
pub fn sentinel_config(resource: &RedisFailover, master_name: &str, password: Option<&str>) -> String {
    let replicas = usize::try_from(resource.spec.sentinel.replicas.max(1)).unwrap_or(1);
    let mut lines = vec![
        format!(
            "sentinel monitor {} 127.0.0.1 6379 {}",
            master_name,
            quorum(replicas)
        ),
        format!("sentinel down-after-milliseconds {} 1000", master_name),
        format!("sentinel failover-timeout {} 3000", master_name),
        format!("sentinel parallel-syncs {} 2", master_name),
    ];
    if let Some(pass) = password {
        lines.push(format!("sentinel auth-pass {} {}", master_name, pass));
    }
    lines.join("\n")
}

/// Render `redis.conf`: replication and persistence defaults, credentials,
/// then the resource's custom lines.
pub fn redis_config(resource: &RedisFailover, password: Option<&str>) -> String {
    let mut lines = vec![
        "slaveof 127.0.0.1 6379".to_string(),
        "tcp-keepalive 60".to_string(),
        "save 900 1".to_string(),
        "save 300 10".to_string(),
    ];
    if let Some(pass) = password {
        lines.push(format!("requirepass {}", pass));
        lines.push(format!("masterauth {}", pass));
    }
    lines.extend(resource.spec.redis.custom_config.iter().cloned());
    lines.join("\n")
}

/// Render `shutdown.sh`.
///
/// Saves the dataset and asks sentinel for a failover when this pod is the
/// current master. The credential is read from `REDIS_PASSWORD` in the pod.
pub fn shutdown_script(resource: &RedisFailover, master_name: &str) -> String {
    let env_prefix = sentinel_name(resource).replace('-', "_").to_uppercase();
    let host = format!("${{{}_SERVICE_HOST}}", env_prefix);
    let port = format!("${{{}_SERVICE_PORT_SENTINEL}}", env_prefix);

    format!(
        r#"#!/bin/sh
master=$(redis-cli -h {host} -p {port} --csv SENTINEL get-master-addr-by-name {name} | tr ',' ' ' | tr -d '"' | cut -d' ' -f1)
if [ -n "$REDIS_PASSWORD" ]; then
  redis-cli -a "$REDIS_PASSWORD" --no-auth-warning SAVE
else
  redis-cli SAVE
fi
if [ "$master" = "$(hostname -i)" ]; then
  redis-cli -h {host} -p {port} SENTINEL failover {name}
fi
"#,
        host = host,
        port = port,
        name = master_name,
    )
}

fn configmap(
    resource: &RedisFailover,
    name: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    file: &str,
    content: String,
) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert(file.to_string(), content);

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: resource.namespace(),
            labels: Some(labels),
            annotations: non_empty(annotations),
            owner_references: Some(vec![owner_reference(resource)]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// Generate the sentinel ConfigMap.
pub fn generate_sentinel_configmap(
    resource: &RedisFailover,
    default_labels: &BTreeMap<String, String>,
    default_annotations: &BTreeMap<String, String>,
    master_name: &str,
    password: Option<&str>,
) -> ConfigMap {
    configmap(
        resource,
        sentinel_name(resource),
        component_labels(resource, default_labels, SENTINEL_COMPONENT),
        standard_annotations(resource, default_annotations),
        SENTINEL_CONFIG_FILE,
        sentinel_config(resource, master_name, password),
    )
}

/// Generate the redis ConfigMap.
pub fn generate_redis_configmap(
    resource: &RedisFailover,
    default_labels: &BTreeMap<String, String>,
    default_annotations: &BTreeMap<String, String>,
    password: Option<&str>,
) -> ConfigMap {
    configmap(
        resource,
        redis_name(resource),
        component_labels(resource, default_labels, REDIS_COMPONENT),
        standard_annotations(resource, default_annotations),
        REDIS_CONFIG_FILE,
        redis_config(resource, password),
    )
}

/// Generate the redis shutdown script ConfigMap.
pub fn generate_redis_shutdown_configmap(
    resource: &RedisFailover,
    default_labels: &BTreeMap<String, String>,
    default_annotations: &BTreeMap<String, String>,
    master_name: &str,
) -> ConfigMap {
    configmap(
        resource,
        redis_shutdown_name(resource),
        component_labels(resource, default_labels, REDIS_COMPONENT),
        standard_annotations(resource, default_annotations),
        SHUTDOWN_SCRIPT_FILE,
        shutdown_script(resource, master_name),
    )
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::crd::RedisFailoverSpec;

    fn test_resource(name: &str) -> RedisFailover {
        let mut spec = RedisFailoverSpec::default();
        spec.redis.custom_config = vec!["maxmemory 100mb".to_string()];
        RedisFailover {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some("test-uid".to_string()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    #[test]
    fn test_sentinel_config_quorum_follows_replicas() {
        let mut resource = test_resource("cache");
        resource.spec.sentinel.replicas = 5;
        let conf = sentinel_config(&resource, "mymaster", Some("s3cret"));
        assert!(conf.starts_with("sentinel monitor mymaster 127.0.0.1 6379 3"));
        assert!(conf.contains("sentinel auth-pass mymaster s3cret"));
    }

    #[test]
    fn test_sentinel_config_without_password() {
        let resource = test_resource("cache");
        let conf = sentinel_config(&resource, "mymaster", None);
        assert!(!conf.contains("auth-pass"));
        assert!(conf.contains("sentinel parallel-syncs mymaster 2"));
    }

    #[test]
    fn test_redis_config_order() {
        let resource = test_resource("cache");
        let conf = redis_config(&resource, Some("s3cret"));
        let lines: Vec<&str> = conf.lines().collect();
        assert_eq!(lines[0], "slaveof 127.0.0.1 6379");
        assert!(lines.contains(&"requirepass s3cret"));
        assert_eq!(*lines.last().unwrap(), "maxmemory 100mb");
    }

    #[test]
    fn test_shutdown_script_uses_sentinel_service_env() {
        let resource = test_resource("my-cache");
        let script = shutdown_script(&resource, "mymaster");
        assert!(script.contains("${RFS_MY_CACHE_SERVICE_HOST}"));
        assert!(script.contains("SENTINEL failover mymaster"));
        assert!(!script.contains("s3cret"));
    }

    #[test]
    fn test_generated_configmaps() {
        let resource = test_resource("cache");
        let labels = BTreeMap::new();
        let annotations = BTreeMap::new();

        let sentinel =
            generate_sentinel_configmap(&resource, &labels, &annotations, "mymaster", None);
        assert_eq!(sentinel.metadata.name, Some("rfs-cache".to_string()));
        assert!(sentinel.data.unwrap().contains_key(SENTINEL_CONFIG_FILE));

        let redis = generate_redis_configmap(&resource, &labels, &annotations, None);
        assert_eq!(redis.metadata.name, Some("rfr-cache".to_string()));

        let shutdown =
            generate_redis_shutdown_configmap(&resource, &labels, &annotations, "mymaster");
        assert_eq!(shutdown.metadata.name, Some("rfr-s-cache".to_string()));
        assert_eq!(
            shutdown.metadata.labels.unwrap()["app.kubernetes.io/component"],
            "redis"
        );
    }
}
