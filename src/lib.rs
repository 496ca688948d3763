//! redis-failover-operator library crate
//!
//! Exports the RedisFailover CRD, the node client, the reconcile pass and the
//! resource generators, plus [`run_controller`], which wires them into a
//! kube-runtime controller.

pub mod client;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use controller::config::OperatorConfig;
pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::controller::{self as runtime_controller, Action};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::context::Context;
use controller::error::Error;
use controller::reconciler::{error_policy, reconcile};
use crd::RedisFailover;

/// Namespaced API when `namespace` is set, cluster-wide otherwise.
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Watch every RedisFailover through a reflector, with backoff, dropping
/// events that do not change the generation (status writes included).
fn failover_stream(
    api: Api<RedisFailover>,
    config: WatcherConfig,
) -> (
    reflector::Store<RedisFailover>,
    impl Stream<Item = Result<RedisFailover, watcher::Error>>,
) {
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation, Default::default());
    (reader, stream)
}

type PassResult =
    Result<(ObjectRef<RedisFailover>, Action), runtime_controller::Error<Error, watcher::Error>>;

fn log_result(result: PassResult) {
    match result {
        Ok((obj, _)) => debug!(name = %obj.name, "Reconciled"),
        // Watch events for owned objects can outlive the instance.
        Err(runtime_controller::Error::ObjectNotFound(obj)) => {
            debug!(name = %obj.name, "Instance no longer exists");
        }
        Err(runtime_controller::Error::ReconcilerFailed(err, obj)) if err.is_not_found() => {
            debug!(name = %obj.name, "Instance deleted during pass");
        }
        Err(e) => error!(error = ?e, "Reconciliation failed"),
    }
}

/// Run the RedisFailover controller until its stream ends.
///
/// Watches `config.watch_namespace`, or every namespace when unset. Owned
/// StatefulSets and Deployments are watched in full, Services and ConfigMaps
/// by metadata only; a change to any of them triggers a pass on the owner.
///
/// When `health_state` is given, readiness is set and pass metrics recorded.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
) {
    let namespace = config.watch_namespace.clone();
    let namespace = namespace.as_deref();
    info!(
        scope = namespace.unwrap_or("cluster-wide"),
        "Starting RedisFailover controller"
    );

    if let Some(state) = &health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(client.clone(), config, health_state));
    let watcher_config = WatcherConfig::default().any_semantic();

    let (reader, failovers) = failover_stream(
        scoped_api(client.clone(), namespace),
        watcher_config.clone(),
    );
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let deployments: Api<Deployment> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = scoped_api(client, namespace);

    Controller::for_stream(failovers, reader)
        .owns(statefulsets, watcher_config.clone())
        .owns(deployments, watcher_config.clone())
        .owns_stream(metadata_watcher(services, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(configmaps, watcher_config).touched_objects())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move { log_result(result) })
        .await;

    error!("Controller stream ended unexpectedly");
}
