//! Object store access used by the reconcile pass.
//!
//! [`ObjectStore`] is the only way the checker and reconciler read or write
//! cluster objects; [`KubeObjectStore`] backs it with the Kubernetes API.

use async_trait::async_trait;
use jiff::Timestamp;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::crd::{RedisFailover, RedisFailoverStatus};

/// Namespace and name of a RedisFailover.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    /// Key of an existing resource.
    pub fn of(resource: &RedisFailover) -> Self {
        Self {
            namespace: resource.namespace().unwrap_or_else(|| "default".to_string()),
            name: resource.name_any(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A running pod as seen by the checker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub ip: String,
    pub host_ip: String,
    pub created_at: Timestamp,
}

/// Kinds of objects the operator creates for an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OwnedKind {
    Service,
    ConfigMap,
    StatefulSet,
    Deployment,
    PodDisruptionBudget,
    PersistentVolumeClaim,
}

impl OwnedKind {
    /// Every kind, in deletion order.
    pub const ALL: [OwnedKind; 6] = [
        OwnedKind::Deployment,
        OwnedKind::StatefulSet,
        OwnedKind::PodDisruptionBudget,
        OwnedKind::Service,
        OwnedKind::ConfigMap,
        OwnedKind::PersistentVolumeClaim,
    ];
}

impl std::fmt::Display for OwnedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            OwnedKind::Service => "Service",
            OwnedKind::ConfigMap => "ConfigMap",
            OwnedKind::StatefulSet => "StatefulSet",
            OwnedKind::Deployment => "Deployment",
            OwnedKind::PodDisruptionBudget => "PodDisruptionBudget",
            OwnedKind::PersistentVolumeClaim => "PersistentVolumeClaim",
        };
        f.write_str(kind)
    }
}

/// One object owned by an instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnedObject {
    pub kind: OwnedKind,
    pub namespace: String,
    pub name: String,
}

/// Read and write access to cluster objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Running, addressable pods matching `selector`.
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>>;

    /// Replace the status of the instance wholesale.
    async fn write_status(&self, key: &ObjectKey, status: &RedisFailoverStatus) -> Result<()>;

    /// Check if the instance still exists and is not being deleted.
    async fn exists(&self, key: &ObjectKey) -> Result<bool>;

    /// Read one key of a Secret as UTF-8.
    async fn read_secret_key(&self, namespace: &str, name: &str, key: &str) -> Result<String>;

    /// Objects matching `selector` whose owner references include `uid`.
    async fn enumerate_owned_objects(
        &self,
        key: &ObjectKey,
        uid: &str,
        selector: &str,
    ) -> Result<Vec<OwnedObject>>;

    /// Delete one owned object; a missing object is not an error.
    async fn delete_owned_object(&self, object: &OwnedObject) -> Result<()>;
}

/// `ObjectStore` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    /// Create a store on the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn owned_names<K>(&self, namespace: &str, uid: &str, selector: &str) -> Result<Vec<String>>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default().labels(selector)).await?;
        Ok(list
            .items
            .iter()
            .filter(|obj| obj.owner_references().iter().any(|owner| owner.uid == uid))
            .map(|obj| obj.name_any())
            .collect())
    }

    async fn delete<K>(&self, namespace: &str, name: &str) -> Result<()>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Convert a listed pod into a [`PodInfo`], skipping pods that cannot serve.
pub fn pod_info(pod: &Pod) -> Option<PodInfo> {
    if pod.metadata.deletion_timestamp.is_some() {
        return None;
    }
    let status = pod.status.as_ref()?;
    if status.phase.as_deref() != Some("Running") {
        return None;
    }
    let ip = status.pod_ip.clone().filter(|ip| !ip.is_empty())?;
    let created_at = pod.metadata.creation_timestamp.as_ref()?.0;

    Some(PodInfo {
        name: pod.name_any(),
        ip,
        host_ip: status.host_ip.clone().unwrap_or_default(),
        created_at,
    })
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default().labels(selector)).await?;

        let infos: Vec<PodInfo> = pods.items.iter().filter_map(pod_info).collect();
        debug!(
            namespace = %namespace,
            selector = %selector,
            listed = pods.items.len(),
            running = infos.len(),
            "Listed pods"
        );
        Ok(infos)
    }

    async fn write_status(&self, key: &ObjectKey, status: &RedisFailoverStatus) -> Result<()> {
        let api: Api<RedisFailover> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(
            &key.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(|e| Error::StatusWrite(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, key: &ObjectKey) -> Result<bool> {
        let api: Api<RedisFailover> = Api::namespaced(self.client.clone(), &key.namespace);
        let current = api.get_opt(&key.name).await?;
        Ok(current.is_some_and(|rf| rf.metadata.deletion_timestamp.is_none()))
    }

    async fn read_secret_key(&self, namespace: &str, name: &str, key: &str) -> Result<String> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(name).await?;
        let bytes = secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .ok_or_else(|| {
                Error::ObjectStore(format!("secret {}/{} has no key '{}'", namespace, name, key))
            })?;
        String::from_utf8(bytes.0.clone()).map_err(|_| {
            Error::ObjectStore(format!(
                "secret {}/{} key '{}' is not valid UTF-8",
                namespace, name, key
            ))
        })
    }

    async fn enumerate_owned_objects(
        &self,
        key: &ObjectKey,
        uid: &str,
        selector: &str,
    ) -> Result<Vec<OwnedObject>> {
        let ns = key.namespace.as_str();
        let mut objects = Vec::new();

        for kind in OwnedKind::ALL {
            let names = match kind {
                OwnedKind::Service => self.owned_names::<Service>(ns, uid, selector).await?,
                OwnedKind::ConfigMap => self.owned_names::<ConfigMap>(ns, uid, selector).await?,
                OwnedKind::StatefulSet => {
                    self.owned_names::<StatefulSet>(ns, uid, selector).await?
                }
                OwnedKind::Deployment => self.owned_names::<Deployment>(ns, uid, selector).await?,
                OwnedKind::PodDisruptionBudget => {
                    self.owned_names::<PodDisruptionBudget>(ns, uid, selector)
                        .await?
                }
                OwnedKind::PersistentVolumeClaim => {
                    self.owned_names::<PersistentVolumeClaim>(ns, uid, selector)
                        .await?
                }
            };
            objects.extend(names.into_iter().map(|name| OwnedObject {
                kind,
                namespace: key.namespace.clone(),
                name,
            }));
        }

        Ok(objects)
    }

    async fn delete_owned_object(&self, object: &OwnedObject) -> Result<()> {
        let ns = object.namespace.as_str();
        let name = object.name.as_str();
        let result = match object.kind {
            OwnedKind::Service => self.delete::<Service>(ns, name).await,
            OwnedKind::ConfigMap => self.delete::<ConfigMap>(ns, name).await,
            OwnedKind::StatefulSet => self.delete::<StatefulSet>(ns, name).await,
            OwnedKind::Deployment => self.delete::<Deployment>(ns, name).await,
            OwnedKind::PodDisruptionBudget => self.delete::<PodDisruptionBudget>(ns, name).await,
            OwnedKind::PersistentVolumeClaim => {
                self.delete::<PersistentVolumeClaim>(ns, name).await
            }
        };
        if let Err(e) = &result {
            warn!(kind = %object.kind, name = %name, error = %e, "Failed to delete owned object");
        }
        result
    }
}
