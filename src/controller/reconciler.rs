//! Reconciliation loop for RedisFailover.
//!
//! [`Reconciler::run_pass`] runs one strictly staged pass against an
//! instance:
//!
//! 1. Ensure every managed object.
//! 2. Check the live topology.
//! 3. Resolve master ambiguity.
//! 4. Restore and re-monitor misconfigured or stale sentinels.
//! 5. Push config to drifted nodes.
//! 6. Persist the recomputed status.
//!
//! The first failing stage aborts the pass; nothing is retried inside a pass,
//! convergence comes from the next one. [`reconcile`] and [`error_policy`]
//! wire a pass into the kube-runtime controller.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use futures::future::join_all;
use kube::{Api, ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::client::{Endpoint, NodeClient, NodeError};
use crate::controller::checker::{Checker, Discrepancy, NodeKind, Stage};
use crate::controller::common::{add_finalizer, has_finalizer, remove_finalizer};
use crate::controller::config::OperatorConfig;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::healer::{HealAction, Healer};
use crate::controller::status::StatusBuilder;
use crate::controller::topology::{NodeState, Topology};
use crate::controller::validation::validate_spec;
use crate::crd::{RedisFailover, RedisFailoverStatus};
use crate::resources::{EnsureRequest, Ensurer, ObjectKey, ObjectStore};

/// What one successful pass observed and did.
#[derive(Debug, Default)]
pub struct PassOutcome {
    /// Discrepancies found by the check.
    pub discrepancies: Vec<Discrepancy>,
    /// Corrective commands issued.
    pub actions: Vec<HealAction>,
    /// Status written, or `None` when the resource disappeared mid-pass.
    pub status: Option<RedisFailoverStatus>,
}

/// Runs passes through the object store, node client and ensurer seams.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    nodes: Arc<dyn NodeClient>,
    ensurer: Arc<dyn Ensurer>,
    config: Arc<OperatorConfig>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        nodes: Arc<dyn NodeClient>,
        ensurer: Arc<dyn Ensurer>,
        config: Arc<OperatorConfig>,
    ) -> Self {
        Self {
            store,
            nodes,
            ensurer,
            config,
        }
    }

    /// Operator configuration used by every pass.
    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Resolve the declared credential, reading the Secret when referenced.
    pub async fn resolve_password(&self, failover: &RedisFailover) -> Result<Option<String>> {
        if let Some(password) = failover.spec.inline_password() {
            return Ok(Some(password.to_string()));
        }
        let Some(auth) = &failover.spec.redis.auth else {
            return Ok(None);
        };

        let key = ObjectKey::of(failover);
        let password = self
            .store
            .read_secret_key(&key.namespace, &auth.secret_ref.name, &auth.secret_ref.key)
            .await?;
        Ok(Some(password).filter(|p| !p.is_empty()))
    }

    /// Run one pass against `failover`.
    pub async fn run_pass(&self, failover: &RedisFailover) -> Result<PassOutcome> {
        let key = ObjectKey::of(failover);
        validate_spec(failover)?;
        let password = self.resolve_password(failover).await?;
        let password = password.as_deref();

        // Stage 1: ensure
        let request = EnsureRequest {
            failover,
            password,
            default_labels: &self.config.default_labels,
            default_annotations: &self.config.default_annotations,
            master_name: &self.config.master_name,
        };
        self.ensurer.ensure_all(&request).await?;

        // Stage 2: check
        let checker = Checker::new(
            self.nodes.as_ref(),
            self.store.as_ref(),
            self.config.node_timeout,
            self.config.redis_port,
        );
        let (topology, discrepancies) = checker.check(failover, password).await?;
        for discrepancy in &discrepancies {
            info!(name = %key, kind = discrepancy.kind(), "{}", discrepancy);
        }
        if let Some(err) = discrepancies.iter().find_map(rejection) {
            return Err(err);
        }

        let mut healer = Healer::new(self.nodes.as_ref(), password, self.config.redis_port);
        match topology.expected_master(self.config.redis_port) {
            Some(master) => {
                // Stages 3 to 5
                self.resolve_masters(&mut healer, &topology, &discrepancies, &master)
                    .await?;
                self.resolve_sentinels(&mut healer, &discrepancies, &master, topology.quorum())
                    .await?;
                self.resolve_config(&mut healer, failover, &discrepancies)
                    .await?;
            }
            None => debug!(name = %key, "No redis pods running, nothing to heal"),
        }
        let actions = healer.into_actions();

        // Stage 6: status
        let status = self.observed_status(&checker, &topology, password).await;
        if !self.store.exists(&key).await? {
            info!(name = %key, "Resource gone during pass, skipping status write");
            return Ok(PassOutcome {
                discrepancies,
                actions,
                status: None,
            });
        }
        self.store.write_status(&key, &status).await?;

        Ok(PassOutcome {
            discrepancies,
            actions,
            status: Some(status),
        })
    }

    async fn resolve_masters(
        &self,
        healer: &mut Healer<'_>,
        topology: &Topology,
        discrepancies: &[Discrepancy],
        master: &Endpoint,
    ) -> Result<()> {
        let mut repointed = false;
        for discrepancy in discrepancies.iter().filter(|d| d.stage() == Stage::Master) {
            match discrepancy {
                Discrepancy::NoMaster => {
                    healer.set_oldest_as_master(topology).await?;
                    repointed = true;
                }
                Discrepancy::MultipleMasters { masters } => {
                    warn!(
                        masters = ?masters,
                        survivor = %master.ip(),
                        "Multiple masters found, keeping the oldest"
                    );
                    healer.set_master_on_all(master.ip(), topology).await?;
                    repointed = true;
                }
                Discrepancy::ReplicaMisrouted { ip } => {
                    if !repointed {
                        debug!(ip = %ip, master = %master, "Replica follows the wrong master");
                        healer.set_master_on_all(master.ip(), topology).await?;
                        repointed = true;
                    }
                }
                Discrepancy::SentinelMisconfigured { .. }
                | Discrepancy::SentinelNeedsReset { .. }
                | Discrepancy::ConfigDrift { .. }
                | Discrepancy::NodeUnreachable { .. }
                | Discrepancy::CommandRejected { .. } => {}
            }
        }
        Ok(())
    }

    async fn resolve_sentinels(
        &self,
        healer: &mut Healer<'_>,
        discrepancies: &[Discrepancy],
        master: &Endpoint,
        quorum: u32,
    ) -> Result<()> {
        let targets: BTreeSet<&str> = discrepancies
            .iter()
            .filter_map(|d| match d {
                Discrepancy::SentinelMisconfigured { ip } | Discrepancy::SentinelNeedsReset { ip } => {
                    Some(ip.as_str())
                }
                _ => None,
            })
            .collect();

        for ip in targets {
            healer.restore_sentinel(ip).await?;
            healer.new_sentinel_monitor(ip, master, quorum).await?;
        }
        Ok(())
    }

    async fn resolve_config(
        &self,
        healer: &mut Healer<'_>,
        failover: &RedisFailover,
        discrepancies: &[Discrepancy],
    ) -> Result<()> {
        let redis_lines = &failover.spec.redis.custom_config;
        let sentinel_lines = &failover.spec.sentinel.custom_config;

        let mut redis_targets = BTreeSet::new();
        let mut sentinel_targets = BTreeSet::new();
        for discrepancy in discrepancies {
            if let Discrepancy::ConfigDrift { kind, ip } = discrepancy {
                match kind {
                    NodeKind::Redis => redis_targets.insert(ip.clone()),
                    NodeKind::Sentinel => sentinel_targets.insert(ip.clone()),
                };
            }
        }

        // A fresh monitor starts from default settings.
        if !sentinel_lines.is_empty() {
            sentinel_targets.extend(healer.actions().iter().filter_map(|a| match a {
                HealAction::MonitoredMaster { ip, .. } => Some(ip.clone()),
                _ => None,
            }));
        }

        for ip in &redis_targets {
            healer.set_redis_custom_config(ip, redis_lines).await?;
        }
        for ip in &sentinel_targets {
            healer.set_sentinel_custom_config(ip, sentinel_lines).await?;
        }
        Ok(())
    }

    /// Recompute node views from the nodes that answered this pass.
    ///
    /// Redis roles are queried again so the status reflects the healing just
    /// done; a node that fails the query is left out.
    async fn observed_status(
        &self,
        checker: &Checker<'_>,
        topology: &Topology,
        password: Option<&str>,
    ) -> RedisFailoverStatus {
        let roles = join_all(topology.reachable_redis().map(|node| async move {
            let state = checker
                .bounded(node.ip(), self.nodes.get_role(node.ip(), password))
                .await;
            (node, state)
        }))
        .await;

        let mut builder = StatusBuilder::new();
        for (node, state) in roles {
            match state {
                NodeState::Live(role) => {
                    builder.redis(&node.pod, role.is_master());
                }
                NodeState::Unreachable(reason) | NodeState::Rejected(reason) => {
                    warn!(ip = %node.ip(), reason = %reason, "Leaving redis node out of status");
                }
            }
        }
        for sentinel in topology.reachable_sentinels() {
            builder.sentinel(&sentinel.pod);
        }
        builder.build()
    }

    /// Delete every owned object of a deleted instance.
    pub async fn cleanup(&self, failover: &RedisFailover) -> Result<usize> {
        self.ensurer.delete_owned(failover).await
    }
}

/// Turn a rejected check query into the pass error.
fn rejection(discrepancy: &Discrepancy) -> Option<Error> {
    match discrepancy {
        Discrepancy::CommandRejected { kind, ip, reason } => {
            Some(Error::ProtocolRejected(NodeError::Rejected {
                ip: ip.clone(),
                command: format!("{} check", kind),
                reason: reason.clone(),
            }))
        }
        _ => None,
    }
}

/// Reconcile a RedisFailover
///
/// This is the main reconciliation function called by the controller.
/// Runs one pass, or the owned-object cleanup when the resource is deleted.
pub async fn reconcile(obj: Arc<RedisFailover>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling RedisFailover");

    let api: Api<RedisFailover> = Api::namespaced(ctx.client.clone(), &namespace);

    // Handle deletion
    if obj.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&obj, &ctx, &api).await;
    }

    // Ensure finalizer is present
    if !has_finalizer(&obj) {
        info!(name = %name, "Adding finalizer");
        add_finalizer(&api, &name).await?;
    }

    let outcome = match ctx.reconciler.run_pass(&obj).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(name = %name, namespace = %namespace, error = %e, "Pass aborted");
            if let Some(ref health_state) = ctx.health_state {
                health_state
                    .metrics
                    .set_cluster_ok(&namespace, &name, false);
            }
            ctx.publish_warning_event(&obj, e.reason(), "Reconciling", Some(e.to_string()))
                .await;
            return Err(e);
        }
    };

    for action in &outcome.actions {
        ctx.publish_normal_event(&obj, action.reason(), "Healing", Some(action.to_string()))
            .await;
    }

    if let Some(ref health_state) = ctx.health_state {
        for action in &outcome.actions {
            health_state.metrics.record_heal(action.kind());
        }
        health_state.metrics.set_cluster_ok(&namespace, &name, true);
        health_state.metrics.record_reconcile(
            &namespace,
            &name,
            start_time.elapsed().as_secs_f64(),
        );
        let now = u64::try_from(jiff::Timestamp::now().as_second()).unwrap_or_default();
        health_state.last_reconcile.store(now, Ordering::Relaxed);
    }

    if outcome.actions.is_empty() {
        debug!(name = %name, "Instance converged");
    } else {
        info!(
            name = %name,
            discrepancies = outcome.discrepancies.len(),
            actions = outcome.actions.len(),
            "Healed instance"
        );
    }

    Ok(Action::requeue(ctx.config.resync_interval))
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<RedisFailover>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    // Record error metric
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

/// Handle deletion of a RedisFailover
async fn handle_deletion(
    obj: &RedisFailover,
    ctx: &Context,
    api: &Api<RedisFailover>,
) -> Result<Action> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    info!(name = %name, "Handling deletion");

    if has_finalizer(obj) {
        let deleted = ctx.reconciler.cleanup(obj).await?;
        info!(name = %name, deleted, "Owned objects removed");
        remove_finalizer(api, &name).await?;
    }

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.remove_cluster_ok(&namespace, &name);
    }

    Ok(Action::await_change())
}
