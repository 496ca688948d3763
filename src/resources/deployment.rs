//! Deployment generation for the sentinel nodes.
//!
//! Sentinel rewrites its config file at runtime, so an init container copies
//! `sentinel.conf` from the read-only ConfigMap into a writable emptyDir.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, PodSpec,
    PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use crate::crd::RedisFailover;
use crate::resources::common::{
    SENTINEL_COMPONENT, component_labels, non_empty, owner_reference, selector_labels,
    sentinel_name, standard_annotations,
};
use crate::resources::configmaps::SENTINEL_CONFIG_FILE;
use crate::resources::pod::{convert_tolerations, exec_probe, resource_requirements, soft_anti_affinity};
use crate::resources::services::SENTINEL_PORT;

const CONFIG_VOLUME: &str = "sentinel-config";
const WRITABLE_VOLUME: &str = "sentinel-config-writable";

/// Generate the sentinel Deployment.
pub fn generate_sentinel_deployment(
    resource: &RedisFailover,
    default_labels: &BTreeMap<String, String>,
    default_annotations: &BTreeMap<String, String>,
) -> Deployment {
    let labels = component_labels(resource, default_labels, SENTINEL_COMPONENT);
    let annotations = standard_annotations(resource, default_annotations);
    let selector = selector_labels(resource, SENTINEL_COMPONENT);

    Deployment {
        metadata: ObjectMeta {
            name: Some(sentinel_name(resource)),
            namespace: resource.namespace(),
            labels: Some(labels.clone()),
            annotations: non_empty(annotations.clone()),
            owner_references: Some(vec![owner_reference(resource)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(resource.spec.sentinel.replicas),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: non_empty(annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    affinity: Some(soft_anti_affinity(&selector)),
                    tolerations: convert_tolerations(&resource.spec.sentinel.tolerations),
                    init_containers: Some(vec![generate_config_copy_container(resource)]),
                    containers: vec![generate_sentinel_container(resource)],
                    volumes: Some(vec![
                        Volume {
                            name: CONFIG_VOLUME.to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: sentinel_name(resource),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        Volume {
                            name: WRITABLE_VOLUME.to_string(),
                            empty_dir: Some(EmptyDirVolumeSource::default()),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_config_copy_container(resource: &RedisFailover) -> Container {
    Container {
        name: "sentinel-config-copy".to_string(),
        image: Some(resource.spec.sentinel.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec![
            "cp".to_string(),
            format!("/redis/{}", SENTINEL_CONFIG_FILE),
            format!("/redis-writable/{}", SENTINEL_CONFIG_FILE),
        ]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: CONFIG_VOLUME.to_string(),
                mount_path: "/redis".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: WRITABLE_VOLUME.to_string(),
                mount_path: "/redis-writable".to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

fn generate_sentinel_container(resource: &RedisFailover) -> Container {
    let ping = format!("redis-cli -h $(hostname) -p {} ping", SENTINEL_PORT);

    Container {
        name: "sentinel".to_string(),
        image: Some(resource.spec.sentinel.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(sentinel_command(resource)),
        ports: Some(vec![ContainerPort {
            container_port: SENTINEL_PORT,
            name: Some("sentinel".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: resource_requirements(&resource.spec.sentinel.resources),
        volume_mounts: Some(vec![VolumeMount {
            name: WRITABLE_VOLUME.to_string(),
            mount_path: "/redis".to_string(),
            ..Default::default()
        }]),
        readiness_probe: Some(exec_probe(&ping)),
        liveness_probe: Some(exec_probe(&ping)),
        ..Default::default()
    }
}

/// Container command: the declared one, or `redis-server /redis/sentinel.conf --sentinel`.
pub fn sentinel_command(resource: &RedisFailover) -> Vec<String> {
    if !resource.spec.sentinel.command.is_empty() {
        return resource.spec.sentinel.command.clone();
    }
    vec![
        "redis-server".to_string(),
        format!("/redis/{}", SENTINEL_CONFIG_FILE),
        "--sentinel".to_string(),
    ]
}
