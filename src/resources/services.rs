//! Service generation for RedisFailover instances.
//!
//! Creates two services:
//! - **Sentinel Service**: stable endpoint clients use to discover the master
//! - **Redis Service**: headless, gives every redis pod a DNS record

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::RedisFailover;
use crate::resources::common::{
    REDIS_COMPONENT, SENTINEL_COMPONENT, component_labels, non_empty, owner_reference,
    redis_name, selector_labels, sentinel_name, standard_annotations,
};

/// Redis client port
pub const REDIS_PORT: i32 = 6379;
/// Sentinel port
pub const SENTINEL_PORT: i32 = 26379;

/// Generate the sentinel Service.
pub fn generate_sentinel_service(
    resource: &RedisFailover,
    default_labels: &BTreeMap<String, String>,
    default_annotations: &BTreeMap<String, String>,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(sentinel_name(resource)),
            namespace: resource.namespace(),
            labels: Some(component_labels(resource, default_labels, SENTINEL_COMPONENT)),
            annotations: non_empty(standard_annotations(resource, default_annotations)),
            owner_references: Some(vec![owner_reference(resource)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector_labels(resource, SENTINEL_COMPONENT)),
            ports: Some(vec![ServicePort {
                port: SENTINEL_PORT,
                target_port: Some(IntOrString::String("sentinel".to_string())),
                name: Some("sentinel".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the headless redis Service.
///
/// `publishNotReadyAddresses` keeps DNS records for pods that are still
/// syncing from the master.
pub fn generate_redis_service(
    resource: &RedisFailover,
    default_labels: &BTreeMap<String, String>,
    default_annotations: &BTreeMap<String, String>,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(redis_name(resource)),
            namespace: resource.namespace(),
            labels: Some(component_labels(resource, default_labels, REDIS_COMPONENT)),
            annotations: non_empty(standard_annotations(resource, default_annotations)),
            owner_references: Some(vec![owner_reference(resource)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(selector_labels(resource, REDIS_COMPONENT)),
            ports: Some(vec![ServicePort {
                port: REDIS_PORT,
                target_port: Some(IntOrString::String("redis".to_string())),
                name: Some("redis".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
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
        RedisFailover {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some("test-uid".to_string()),
                ..Default::default()
            },
            spec: RedisFailoverSpec::default(),
            status: None,
        }
    }

    #[test]
    fn test_sentinel_service() {
        let resource = test_resource("cache");
        let svc = generate_sentinel_service(&resource, &BTreeMap::new(), &BTreeMap::new());

        assert_eq!(svc.metadata.name, Some("rfs-cache".to_string()));
        assert!(svc.metadata.annotations.is_none());
        let spec = svc.spec.unwrap();
        assert_eq!(spec.ports.unwrap()[0].port, 26379);
        assert_eq!(
            spec.selector.unwrap()["app.kubernetes.io/component"],
            "sentinel"
        );
    }

    #[test]
    fn test_redis_service_is_headless() {
        let resource = test_resource("cache");
        let mut annotations = BTreeMap::new();
        annotations.insert("owner".to_string(), "storage".to_string());
        let svc = generate_redis_service(&resource, &BTreeMap::new(), &annotations);

        assert_eq!(svc.metadata.name, Some("rfr-cache".to_string()));
        assert_eq!(svc.metadata.annotations.unwrap()["owner"], "storage");
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip, Some("None".to_string()));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));
        assert_eq!(spec.ports.unwrap()[0].port, 6379);
    }
}
