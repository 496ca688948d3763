//! Desired-state application for the objects backing an instance.
//!
//! [`Ensurer`] exposes one idempotent operation per managed kind plus the
//! explicit owned-object cleanup run behind the finalizer. [`KubeEnsurer`]
//! applies the generated objects with server-side apply.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::Result;
use crate::crd::RedisFailover;
use crate::resources::common::{
    REDIS_COMPONENT, instance_selector, selector_labels, selector_string,
};
use crate::resources::store::{KubeObjectStore, ObjectKey, ObjectStore, OwnedKind};
use crate::resources::{configmaps, deployment, pdb, services, statefulset};

/// Everything an ensure call needs besides the resource itself.
#[derive(Clone, Copy, Debug)]
pub struct EnsureRequest<'a> {
    /// The instance being reconciled.
    pub failover: &'a RedisFailover,
    /// Resolved credential, if any.
    pub password: Option<&'a str>,
    /// Operator default labels.
    pub default_labels: &'a BTreeMap<String, String>,
    /// Operator default annotations.
    pub default_annotations: &'a BTreeMap<String, String>,
    /// Sentinel master name.
    pub master_name: &'a str,
}

/// Create-or-patch of every managed object kind.
#[async_trait]
pub trait Ensurer: Send + Sync {
    async fn ensure_redis_service(&self, req: &EnsureRequest<'_>) -> Result<()>;
    async fn ensure_sentinel_service(&self, req: &EnsureRequest<'_>) -> Result<()>;
    async fn ensure_sentinel_configmap(&self, req: &EnsureRequest<'_>) -> Result<()>;
    async fn ensure_redis_shutdown_configmap(&self, req: &EnsureRequest<'_>) -> Result<()>;
    async fn ensure_redis_configmap(&self, req: &EnsureRequest<'_>) -> Result<()>;
    async fn ensure_redis_statefulset(&self, req: &EnsureRequest<'_>) -> Result<()>;
    async fn ensure_sentinel_deployment(&self, req: &EnsureRequest<'_>) -> Result<()>;
    async fn ensure_redis_pdb(&self, req: &EnsureRequest<'_>) -> Result<()>;
    async fn ensure_sentinel_pdb(&self, req: &EnsureRequest<'_>) -> Result<()>;

    /// Delete every object owned by the instance; returns how many were deleted.
    async fn delete_owned(&self, failover: &RedisFailover) -> Result<usize>;

    /// Ensure every kind, stopping at the first failure.
    ///
    /// ConfigMaps go before the workloads that mount them.
    async fn ensure_all(&self, req: &EnsureRequest<'_>) -> Result<()> {
        self.ensure_redis_service(req).await?;
        self.ensure_sentinel_service(req).await?;
        self.ensure_sentinel_configmap(req).await?;
        self.ensure_redis_shutdown_configmap(req).await?;
        self.ensure_redis_configmap(req).await?;
        self.ensure_redis_statefulset(req).await?;
        self.ensure_sentinel_deployment(req).await?;
        self.ensure_redis_pdb(req).await?;
        self.ensure_sentinel_pdb(req).await?;
        Ok(())
    }
}

/// Delete owned objects through any [`ObjectStore`].
///
/// Objects are found by the instance label and by the redis pod selector
/// (claims created from the StatefulSet template only carry the latter).
/// Claims are left alone when the storage policy keeps them.
pub async fn delete_owned_objects(store: &dyn ObjectStore, failover: &RedisFailover) -> Result<usize> {
    let key = ObjectKey::of(failover);
    let uid = failover.uid().unwrap_or_default();
    let keep_claims = failover.spec.redis.storage.keep_after_deletion;

    let selectors = [
        instance_selector(failover),
        selector_string(&selector_labels(failover, REDIS_COMPONENT)),
    ];

    let mut objects = BTreeSet::new();
    for selector in &selectors {
        objects.extend(store.enumerate_owned_objects(&key, &uid, selector).await?);
    }

    let mut deleted = 0;
    for object in objects
        .iter()
        .filter(|o| !(keep_claims && o.kind == OwnedKind::PersistentVolumeClaim))
    {
        store.delete_owned_object(object).await?;
        debug!(kind = %object.kind, name = %object.name, "Deleted owned object");
        deleted += 1;
    }

    info!(name = %key, deleted, keep_claims, "Deleted owned objects");
    Ok(deleted)
}

/// `Ensurer` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeEnsurer {
    client: Client,
    store: KubeObjectStore,
}

impl KubeEnsurer {
    /// Create an ensurer on the given client.
    pub fn new(client: Client) -> Self {
        Self {
            store: KubeObjectStore::new(client.clone()),
            client,
        }
    }

    async fn apply<K>(&self, failover: &RedisFailover, object: &K) -> Result<()>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        let namespace = failover.namespace().unwrap_or_else(|| "default".to_string());
        let name = object.name_any();
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(object),
        )
        .await?;
        debug!(
            kind = %K::kind(&Default::default()),
            name = %name,
            "Applied object"
        );
        Ok(())
    }
}

#[async_trait]
impl Ensurer for KubeEnsurer {
    async fn ensure_redis_service(&self, req: &EnsureRequest<'_>) -> Result<()> {
        let svc: Service = services::generate_redis_service(
            req.failover,
            req.default_labels,
            req.default_annotations,
        );
        self.apply(req.failover, &svc).await
    }

    async fn ensure_sentinel_service(&self, req: &EnsureRequest<'_>) -> Result<()> {
        let svc: Service = services::generate_sentinel_service(
            req.failover,
            req.default_labels,
            req.default_annotations,
        );
        self.apply(req.failover, &svc).await
    }

    async fn ensure_sentinel_configmap(&self, req: &EnsureRequest<'_>) -> Result<()> {
        let cm: ConfigMap = configmaps::generate_sentinel_configmap(
            req.failover,
            req.default_labels,
            req.default_annotations,
            req.master_name,
            req.password,
        );
        self.apply(req.failover, &cm).await
    }

    async fn ensure_redis_shutdown_configmap(&self, req: &EnsureRequest<'_>) -> Result<()> {
        let cm: ConfigMap = configmaps::generate_redis_shutdown_configmap(
            req.failover,
            req.default_labels,
            req.default_annotations,
            req.master_name,
        );
        self.apply(req.failover, &cm).await
    }

    async fn ensure_redis_configmap(&self, req: &EnsureRequest<'_>) -> Result<()> {
        let cm: ConfigMap = configmaps::generate_redis_configmap(
            req.failover,
            req.default_labels,
            req.default_annotations,
            req.password,
        );
        self.apply(req.failover, &cm).await
    }

    async fn ensure_redis_statefulset(&self, req: &EnsureRequest<'_>) -> Result<()> {
        let sts: StatefulSet = statefulset::generate_statefulset(
            req.failover,
            req.default_labels,
            req.default_annotations,
            req.password,
        );
        self.apply(req.failover, &sts).await
    }

    async fn ensure_sentinel_deployment(&self, req: &EnsureRequest<'_>) -> Result<()> {
        let deploy: Deployment = deployment::generate_sentinel_deployment(
            req.failover,
            req.default_labels,
            req.default_annotations,
        );
        self.apply(req.failover, &deploy).await
    }

    async fn ensure_redis_pdb(&self, req: &EnsureRequest<'_>) -> Result<()> {
        let budget: PodDisruptionBudget = pdb::generate_redis_pdb(req.failover, req.default_labels);
        self.apply(req.failover, &budget).await
    }

    async fn ensure_sentinel_pdb(&self, req: &EnsureRequest<'_>) -> Result<()> {
        let budget: PodDisruptionBudget =
            pdb::generate_sentinel_pdb(req.failover, req.default_labels);
        self.apply(req.failover, &budget).await
    }

    async fn delete_owned(&self, failover: &RedisFailover) -> Result<usize> {
        delete_owned_objects(&self.store, failover).await
    }
}
