//! Owned object deletion when an instance is removed.

use std::sync::Arc;

use redis_failover_operator::resources::{OwnedKind, OwnedObject};

use crate::*;

fn owned(kind: OwnedKind, name: &str) -> OwnedObject {
    OwnedObject {
        kind,
        namespace: "default".to_string(),
        name: name.to_string(),
    }
}

fn seed(sim: &SimulatedCluster) {
    sim.add_owned(owned(OwnedKind::Deployment, "rfs-cache"));
    sim.add_owned(owned(OwnedKind::StatefulSet, "rfr-cache"));
    sim.add_owned(owned(OwnedKind::Service, "rfs-cache"));
    sim.add_owned(owned(OwnedKind::ConfigMap, "rfr-cache"));
    sim.add_owned(owned(OwnedKind::PersistentVolumeClaim, "redis-data-rfr-cache-0"));
}

#[tokio::test]
async fn test_cleanup_deletes_every_owned_object_once() {
    let sim = Arc::new(SimulatedCluster::new());
    seed(&sim);

    let deleted = reconciler(&sim).cleanup(&failover("cache")).await.unwrap();

    assert_eq!(deleted, 5);
    assert_eq!(sim.deleted().len(), 5);
}

#[tokio::test]
async fn test_cleanup_keeps_claims_when_requested() {
    let sim = Arc::new(SimulatedCluster::new());
    seed(&sim);
    let mut failover = failover("cache");
    failover.spec.redis.storage.keep_after_deletion = true;

    let deleted = reconciler(&sim).cleanup(&failover).await.unwrap();

    assert_eq!(deleted, 4);
    assert!(
        sim.deleted()
            .iter()
            .all(|o| o.kind != OwnedKind::PersistentVolumeClaim)
    );
}

#[tokio::test]
async fn test_cleanup_with_nothing_owned() {
    let sim = Arc::new(SimulatedCluster::new());

    let deleted = reconciler(&sim).cleanup(&failover("cache")).await.unwrap();

    assert_eq!(deleted, 0);
}
