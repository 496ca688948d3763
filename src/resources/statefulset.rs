//! StatefulSet generation for the redis nodes.
//!
//! Creates a StatefulSet with:
//! - Stable network identity via the headless redis service
//! - `redis.conf` and `shutdown.sh` mounted from ConfigMaps
//! - Data volume from the storage policy (emptyDir or a PVC template)
//! - Exec ping probes
//! - preStop hook that saves and hands mastership to sentinel
//! - Soft pod anti-affinity

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    ExecAction, Lifecycle, LifecycleHandler, PersistentVolumeClaim,
    PersistentVolumeClaimSpec as K8sClaimSpec, PodSpec, PodTemplateSpec, SecretKeySelector, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::crd::RedisFailover;
use crate::resources::common::{
    REDIS_COMPONENT, component_labels, non_empty, owner_reference, redis_name,
    redis_shutdown_name, selector_labels, standard_annotations,
};
use crate::resources::configmaps::REDIS_CONFIG_FILE;
use crate::resources::pod::{convert_tolerations, exec_probe, resource_requirements, soft_anti_affinity};
use crate::resources::services::REDIS_PORT;

/// Volume holding `redis.conf`.
const CONFIG_VOLUME: &str = "redis-config";
/// Volume holding `shutdown.sh`.
const SHUTDOWN_VOLUME: &str = "redis-shutdown-config";
/// Default data volume name.
const DATA_VOLUME: &str = "redis-data";
/// Environment variable carrying the credential inside redis pods.
pub const PASSWORD_ENV: &str = "REDIS_PASSWORD";
/// Pod-template annotation carrying a digest of the resolved credential.
/// A rotated secret value changes it, which rolls the redis pods.
pub const CREDENTIAL_CHECKSUM_ANNOTATION: &str =
    "redisfailovers.databases.spotahome.com/credential-checksum";

/// Hex SHA-256 of the resolved credential.
pub fn credential_checksum(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

/// Generate the redis StatefulSet.
///
/// `password` is the resolved credential; only its digest lands in the
/// pod template.
pub fn generate_statefulset(
    resource: &RedisFailover,
    default_labels: &BTreeMap<String, String>,
    default_annotations: &BTreeMap<String, String>,
    password: Option<&str>,
) -> StatefulSet {
    let name = redis_name(resource);
    let labels = component_labels(resource, default_labels, REDIS_COMPONENT);
    let annotations = standard_annotations(resource, default_annotations);

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: resource.namespace(),
            labels: Some(labels.clone()),
            annotations: non_empty(annotations.clone()),
            owner_references: Some(vec![owner_reference(resource)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(resource.spec.redis.replicas),
            service_name: Some(name),
            selector: LabelSelector {
                match_labels: Some(selector_labels(resource, REDIS_COMPONENT)),
                ..Default::default()
            },
            pod_management_policy: Some("Parallel".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..Default::default()
            }),
            template: generate_pod_template(resource, &labels, &annotations, password),
            volume_claim_templates: generate_pvc_template(resource).map(|pvc| vec![pvc]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_pod_template(
    resource: &RedisFailover,
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
    password: Option<&str>,
) -> PodTemplateSpec {
    let mut annotations = annotations.clone();
    if let Some(password) = password {
        annotations.insert(
            CREDENTIAL_CHECKSUM_ANNOTATION.to_string(),
            credential_checksum(password),
        );
    }

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            annotations: non_empty(annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            affinity: Some(soft_anti_affinity(&selector_labels(resource, REDIS_COMPONENT))),
            tolerations: convert_tolerations(&resource.spec.redis.tolerations),
            containers: vec![generate_redis_container(resource)],
            volumes: Some(generate_volumes(resource)),
            ..Default::default()
        }),
    }
}

fn has_credential(resource: &RedisFailover) -> bool {
    resource.spec.inline_password().is_some() || resource.spec.redis.auth.is_some()
}

fn generate_redis_container(resource: &RedisFailover) -> Container {
    let ping = if has_credential(resource) {
        format!("REDISCLI_AUTH=${} redis-cli -h $(hostname) ping", PASSWORD_ENV)
    } else {
        "redis-cli -h $(hostname) ping".to_string()
    };

    Container {
        name: "redis".to_string(),
        image: Some(resource.spec.redis.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(redis_command(resource)),
        ports: Some(vec![ContainerPort {
            container_port: REDIS_PORT,
            name: Some("redis".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: generate_env_vars(resource),
        resources: resource_requirements(&resource.spec.redis.resources),
        volume_mounts: Some(generate_volume_mounts(resource)),
        readiness_probe: Some(exec_probe(&ping)),
        liveness_probe: Some(exec_probe(&ping)),
        lifecycle: Some(Lifecycle {
            pre_stop: Some(LifecycleHandler {
                exec: Some(ExecAction {
                    command: Some(vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        "/redis-shutdown/shutdown.sh".to_string(),
                    ]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Container command: the declared one, or `redis-server /redis/redis.conf`.
pub fn redis_command(resource: &RedisFailover) -> Vec<String> {
    if !resource.spec.redis.command.is_empty() {
        return resource.spec.redis.command.clone();
    }
    vec![
        "redis-server".to_string(),
        format!("/redis/{}", REDIS_CONFIG_FILE),
    ]
}

/// Credential env var: from the referenced Secret, or the inline value.
fn generate_env_vars(resource: &RedisFailover) -> Option<Vec<EnvVar>> {
    if let Some(auth) = &resource.spec.redis.auth {
        return Some(vec![EnvVar {
            name: PASSWORD_ENV.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: auth.secret_ref.name.clone(),
                    key: auth.secret_ref.key.clone(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);
    }
    resource.spec.inline_password().map(|pass| {
        vec![EnvVar {
            name: PASSWORD_ENV.to_string(),
            value: Some(pass.to_string()),
            ..Default::default()
        }]
    })
}

/// Name of the data volume, which follows the claim name when a PVC is used.
fn data_volume_name(resource: &RedisFailover) -> String {
    resource
        .spec
        .redis
        .storage
        .persistent_volume_claim
        .as_ref()
        .map(|claim| claim.name.clone())
        .unwrap_or_else(|| DATA_VOLUME.to_string())
}

fn generate_volume_mounts(resource: &RedisFailover) -> Vec<VolumeMount> {
    vec![
        VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: "/redis".to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: SHUTDOWN_VOLUME.to_string(),
            mount_path: "/redis-shutdown".to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: data_volume_name(resource),
            mount_path: "/data".to_string(),
            ..Default::default()
        },
    ]
}

fn generate_volumes(resource: &RedisFailover) -> Vec<Volume> {
    let mut volumes = vec![
        Volume {
            name: CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: redis_name(resource),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: SHUTDOWN_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: redis_shutdown_name(resource),
                default_mode: Some(0o744),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    let storage = &resource.spec.redis.storage;
    if storage.persistent_volume_claim.is_none() {
        let empty_dir = storage
            .empty_dir
            .as_ref()
            .map(|dir| EmptyDirVolumeSource {
                medium: dir.medium.clone(),
                size_limit: dir.size_limit.clone().map(Quantity),
            })
            .unwrap_or_default();
        volumes.push(Volume {
            name: DATA_VOLUME.to_string(),
            empty_dir: Some(empty_dir),
            ..Default::default()
        });
    }

    volumes
}

/// Generate the PVC template, if the storage policy asks for one.
///
/// Without `keepAfterDeletion` the claims carry the owner reference so they
/// are collected together with the instance.
pub fn generate_pvc_template(resource: &RedisFailover) -> Option<PersistentVolumeClaim> {
    let storage = &resource.spec.redis.storage;
    let claim = storage.persistent_volume_claim.as_ref()?;

    let owner_references = if storage.keep_after_deletion {
        None
    } else {
        Some(vec![owner_reference(resource)])
    };

    Some(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(claim.name.clone()),
            owner_references,
            ..Default::default()
        },
        spec: Some(K8sClaimSpec {
            access_modes: Some(claim.access_modes.clone()),
            storage_class_name: claim.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some({
                    let mut requests = BTreeMap::new();
                    requests.insert("storage".to_string(), Quantity(claim.size.clone()));
                    requests
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}
