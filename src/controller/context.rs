//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler,
//! including the Kubernetes client, event recorder and the pass collaborators.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::client::RedisNodeClient;
use crate::controller::config::OperatorConfig;
use crate::controller::reconciler::Reconciler;
use crate::crd::RedisFailover;
use crate::health::HealthState;
use crate::resources::{KubeEnsurer, KubeObjectStore};

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "redis-failover-operator";

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Operator configuration
    pub config: Arc<OperatorConfig>,
    /// Runs one pass per instance
    pub reconciler: Reconciler,
}

impl Context {
    /// Create a new context backed by the Kubernetes API and real nodes
    pub fn new(
        client: Client,
        config: OperatorConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let config = Arc::new(config);
        let reconciler = Reconciler::new(
            Arc::new(KubeObjectStore::new(client.clone())),
            Arc::new(RedisNodeClient::new(config.node_client_config())),
            Arc::new(KubeEnsurer::new(client.clone())),
            config.clone(),
        );
        Self {
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: config.pod_name.clone(),
            },
            client,
            health_state,
            config,
            reconciler,
        }
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    async fn publish(
        &self,
        resource: &RedisFailover,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let object_ref = resource.object_ref(&());
        if let Err(e) = self
            .recorder()
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a normal event for a resource
    pub async fn publish_normal_event(
        &self,
        resource: &RedisFailover,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a resource
    pub async fn publish_warning_event(
        &self,
        resource: &RedisFailover,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Warning, reason, action, note)
            .await;
    }
}
