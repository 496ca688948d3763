//! PodDisruptionBudget generation for RedisFailover instances.
//!
//! One PDB per role keeps a majority of redis nodes and of sentinels running
//! through voluntary disruptions such as node drains.

use std::collections::BTreeMap;

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::controller::topology::quorum;
use crate::crd::RedisFailover;
use crate::resources::common::{
    REDIS_COMPONENT, SENTINEL_COMPONENT, component_labels, owner_reference, redis_name,
    selector_labels, sentinel_name,
};

/// Majority of `replicas`, as a PDB `minAvailable`.
fn min_available(replicas: i32) -> IntOrString {
    let replicas = usize::try_from(replicas.max(1)).unwrap_or(1);
    IntOrString::Int(i32::try_from(quorum(replicas)).unwrap_or(1))
}

fn generate_pdb(
    resource: &RedisFailover,
    name: String,
    labels: BTreeMap<String, String>,
    selector: BTreeMap<String, String>,
    replicas: i32,
) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: resource.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(resource)]),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            min_available: Some(min_available(replicas)),
            selector: Some(LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the redis PodDisruptionBudget.
pub fn generate_redis_pdb(
    resource: &RedisFailover,
    default_labels: &BTreeMap<String, String>,
) -> PodDisruptionBudget {
    generate_pdb(
        resource,
        redis_name(resource),
        component_labels(resource, default_labels, REDIS_COMPONENT),
        selector_labels(resource, REDIS_COMPONENT),
        resource.spec.redis.replicas,
    )
}

/// Generate the sentinel PodDisruptionBudget.
pub fn generate_sentinel_pdb(
    resource: &RedisFailover,
    default_labels: &BTreeMap<String, String>,
) -> PodDisruptionBudget {
    generate_pdb(
        resource,
        sentinel_name(resource),
        component_labels(resource, default_labels, SENTINEL_COMPONENT),
        selector_labels(resource, SENTINEL_COMPONENT),
        resource.spec.sentinel.replicas,
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

    fn test_resource(name: &str, redis: i32, sentinel: i32) -> RedisFailover {
        let mut spec = RedisFailoverSpec::default();
        spec.redis.replicas = redis;
        spec.sentinel.replicas = sentinel;
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
    fn test_redis_pdb_majority() {
        let resource = test_resource("cache", 3, 5);
        let pdb = generate_redis_pdb(&resource, &BTreeMap::new());
        assert_eq!(pdb.metadata.name, Some("rfr-cache".to_string()));
        assert_eq!(pdb.spec.unwrap().min_available, Some(IntOrString::Int(2)));
    }

    #[test]
    fn test_sentinel_pdb_majority() {
        let resource = test_resource("cache", 3, 5);
        let pdb = generate_sentinel_pdb(&resource, &BTreeMap::new());
        assert_eq!(pdb.metadata.name, Some("rfs-cache".to_string()));
        let spec = pdb.spec.unwrap();
        assert_eq!(spec.min_available, Some(IntOrString::Int(3)));
        assert_eq!(
            spec.selector.unwrap().match_labels.unwrap()["app.kubernetes.io/component"],
            "sentinel"
        );
    }

    #[test]
    fn test_single_replica_pdb() {
        let resource = test_resource("cache", 1, 1);
        let pdb = generate_redis_pdb(&resource, &BTreeMap::new());
        assert_eq!(pdb.spec.unwrap().min_available, Some(IntOrString::Int(1)));
    }
}
