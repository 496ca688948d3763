//! In-memory cluster used to drive reconcile passes.
//!
//! `SimulatedCluster` implements all three seams of the reconciler
//! (`NodeClient`, `ObjectStore`, `Ensurer`) over one shared state, so a test
//! can set up a topology, run a real pass and inspect what every node ended
//! up with.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use redis_failover_operator::OperatorConfig;
use redis_failover_operator::client::parsing::{normalize_config_value, split_config_line};
use redis_failover_operator::client::{
    Endpoint, NodeClient, NodeError, RedisRole, SentinelMonitor,
};
use redis_failover_operator::controller::error::{Error, Result};
use redis_failover_operator::controller::reconciler::Reconciler;
use redis_failover_operator::controller::topology::quorum;
use redis_failover_operator::crd::{RedisFailover, RedisFailoverSpec, RedisFailoverStatus};
use redis_failover_operator::resources::{
    EnsureRequest, Ensurer, ObjectKey, ObjectStore, OwnedObject, PodInfo, delete_owned_objects,
};

pub const REDIS_PORT: u16 = 6379;

/// Per-node timeout used by [`reconciler`].
pub const NODE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Health {
    #[default]
    Up,
    Unreachable,
    Rejecting,
    Hanging,
    /// Answers every query after 60% of [`NODE_TIMEOUT`].
    Slow,
}

#[derive(Clone, Debug)]
pub struct SimRedis {
    pub pod: PodInfo,
    pub role: RedisRole,
    pub config: BTreeMap<String, String>,
    pub health: Health,
}

#[derive(Clone, Debug)]
pub struct SimSentinel {
    pub pod: PodInfo,
    pub monitor: SentinelMonitor,
    pub health: Health,
}

#[derive(Default)]
struct State {
    redis: Vec<SimRedis>,
    sentinels: Vec<SimSentinel>,
    status: Option<RedisFailoverStatus>,
    status_writes: usize,
    gone: bool,
    listing_fails: bool,
    failing_ensure: Option<&'static str>,
    status_write_fails: bool,
    refused: Vec<(&'static str, String)>,
    ensured: Vec<&'static str>,
    secrets: BTreeMap<(String, String), String>,
    owned: Vec<OwnedObject>,
    deleted: Vec<OwnedObject>,
    commands: Vec<String>,
}

/// Shared in-memory cluster.
#[derive(Default)]
pub struct SimulatedCluster {
    state: Mutex<State>,
}

pub fn pod(name: &str, ip: &str, created_secs: i64) -> PodInfo {
    PodInfo {
        name: name.to_string(),
        ip: ip.to_string(),
        host_ip: format!("192.168.0.{}", created_secs % 250),
        created_at: Timestamp::from_second(1_700_000_000 + created_secs).unwrap(),
    }
}

pub fn replica_of(master_ip: &str) -> RedisRole {
    RedisRole::Replica {
        master: Some(Endpoint::new(master_ip, REDIS_PORT)),
    }
}

pub fn monitoring(master_ip: &str, quorum: u32, sentinels: u32, replicas: u32) -> SentinelMonitor {
    SentinelMonitor {
        master: Some(Endpoint::new(master_ip, REDIS_PORT)),
        quorum,
        known_sentinels: sentinels,
        known_replicas: replicas,
        settings: BTreeMap::new(),
    }
}

/// A RedisFailover named `name` in `default` with 3 redis and 3 sentinels.
pub fn failover(name: &str) -> RedisFailover {
    RedisFailover {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some(format!("{}-uid", name)),
            ..Default::default()
        },
        spec: RedisFailoverSpec::default(),
        status: None,
    }
}

/// A reconciler whose every seam is `sim`.
pub fn reconciler(sim: &Arc<SimulatedCluster>) -> Reconciler {
    let config = OperatorConfig {
        node_timeout: NODE_TIMEOUT,
        ..Default::default()
    };
    Reconciler::new(sim.clone(), sim.clone(), sim.clone(), Arc::new(config))
}

impl SimulatedCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// `redis` nodes with the first as master and `sentinels` sentinels
    /// monitoring it, all consistent.
    pub fn healthy(redis: usize, sentinels: usize) -> Self {
        let mut sim = Self::new();
        for i in 0..redis {
            let ip = format!("10.0.0.{}", i + 1);
            let role = if i == 0 {
                RedisRole::Master
            } else {
                replica_of("10.0.0.1")
            };
            sim = sim.with_redis(&format!("rfr-cache-{}", i), &ip, i as i64, role);
        }
        let q = quorum(sentinels);
        for i in 0..sentinels {
            let ip = format!("10.0.1.{}", i + 1);
            let monitor = monitoring(
                "10.0.0.1",
                q,
                sentinels as u32,
                redis.saturating_sub(1) as u32,
            );
            sim = sim.with_sentinel(&format!("rfs-cache-{}", i), &ip, i as i64, monitor);
        }
        sim
    }

    pub fn with_redis(self, name: &str, ip: &str, created_secs: i64, role: RedisRole) -> Self {
        self.lock().redis.push(SimRedis {
            pod: pod(name, ip, created_secs),
            role,
            config: BTreeMap::new(),
            health: Health::Up,
        });
        self
    }

    pub fn with_sentinel(
        self,
        name: &str,
        ip: &str,
        created_secs: i64,
        monitor: SentinelMonitor,
    ) -> Self {
        self.lock().sentinels.push(SimSentinel {
            pod: pod(name, ip, created_secs),
            monitor,
            health: Health::Up,
        });
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_health(&self, ip: &str, health: Health) {
        let mut state = self.lock();
        for node in state.redis.iter_mut().filter(|n| n.pod.ip == ip) {
            node.health = health.clone();
        }
        for node in state.sentinels.iter_mut().filter(|n| n.pod.ip == ip) {
            node.health = health.clone();
        }
    }

    pub fn set_role(&self, ip: &str, role: RedisRole) {
        self.with_redis_node(ip, |n| n.role = role);
    }

    pub fn set_monitor(&self, ip: &str, monitor: SentinelMonitor) {
        self.with_sentinel_node(ip, |n| n.monitor = monitor);
    }

    pub fn set_redis_config(&self, ip: &str, param: &str, value: &str) {
        let mut state = self.lock();
        if let Some(node) = state.redis.iter_mut().find(|n| n.pod.ip == ip) {
            node.config.insert(param.to_string(), value.to_string());
        }
    }

    pub fn set_gone(&self) {
        self.lock().gone = true;
    }

    pub fn fail_listing(&self) {
        self.lock().listing_fails = true;
    }

    pub fn fail_ensure(&self, kind: &'static str) {
        self.lock().failing_ensure = Some(kind);
    }

    pub fn fail_status_write(&self) {
        self.lock().status_write_fails = true;
    }

    /// Make the node at `ip` refuse `command` while still answering queries.
    pub fn fail_command(&self, command: &'static str, ip: &str) {
        self.lock().refused.push((command, ip.to_string()));
    }

    pub fn add_secret(&self, name: &str, key: &str, value: &str) {
        self.lock()
            .secrets
            .insert((name.to_string(), key.to_string()), value.to_string());
    }

    pub fn add_owned(&self, object: OwnedObject) {
        self.lock().owned.push(object);
    }

    pub fn role_of(&self, ip: &str) -> RedisRole {
        self.lock()
            .redis
            .iter()
            .find(|n| n.pod.ip == ip)
            .map(|n| n.role.clone())
            .unwrap()
    }

    pub fn redis_config(&self, ip: &str) -> BTreeMap<String, String> {
        self.lock()
            .redis
            .iter()
            .find(|n| n.pod.ip == ip)
            .map(|n| n.config.clone())
            .unwrap()
    }

    pub fn monitor_of(&self, ip: &str) -> SentinelMonitor {
        self.lock()
            .sentinels
            .iter()
            .find(|n| n.pod.ip == ip)
            .map(|n| n.monitor.clone())
            .unwrap()
    }

    /// IPs of nodes that believe they are master.
    pub fn masters(&self) -> Vec<String> {
        self.lock()
            .redis
            .iter()
            .filter(|n| n.role.is_master())
            .map(|n| n.pod.ip.clone())
            .collect()
    }

    pub fn sentinel_ips(&self) -> Vec<String> {
        self.lock()
            .sentinels
            .iter()
            .map(|n| n.pod.ip.clone())
            .collect()
    }

    /// Mutating commands issued so far, as `COMMAND ip [args]`.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    pub fn status(&self) -> Option<RedisFailoverStatus> {
        self.lock().status.clone()
    }

    pub fn status_writes(&self) -> usize {
        self.lock().status_writes
    }

    pub fn ensured(&self) -> Vec<&'static str> {
        self.lock().ensured.clone()
    }

    pub fn deleted(&self) -> Vec<OwnedObject> {
        self.lock().deleted.clone()
    }

    fn record(&self, command: String) {
        self.lock().commands.push(command);
    }

    /// Fail according to the node's health, waiting out the caller's timeout
    /// for hanging nodes.
    async fn gate(&self, ip: &str, health: Option<Health>, command: &str) -> std::result::Result<(), NodeError> {
        match health {
            None => Err(NodeError::Unreachable {
                ip: ip.to_string(),
                reason: "no such pod".to_string(),
            }),
            Some(Health::Up) => Ok(()),
            Some(Health::Unreachable) => Err(NodeError::Unreachable {
                ip: ip.to_string(),
                reason: "connection refused".to_string(),
            }),
            Some(Health::Rejecting) => Err(NodeError::Rejected {
                ip: ip.to_string(),
                command: command.to_string(),
                reason: "NOAUTH Authentication required".to_string(),
            }),
            Some(Health::Slow) => {
                tokio::time::sleep(NODE_TIMEOUT * 6 / 10).await;
                Ok(())
            }
            Some(Health::Hanging) => {
                tokio::time::sleep(NODE_TIMEOUT * 10).await;
                Err(NodeError::Timeout {
                    ip: ip.to_string(),
                    duration: NODE_TIMEOUT * 10,
                })
            }
        }
    }

    fn refusal(&self, ip: &str, command: &str) -> std::result::Result<(), NodeError> {
        let refused = self
            .lock()
            .refused
            .iter()
            .any(|(c, target)| *c == command && target == ip);
        if refused {
            return Err(NodeError::Rejected {
                ip: ip.to_string(),
                command: command.to_string(),
                reason: "READONLY You can't write against a read only replica".to_string(),
            });
        }
        Ok(())
    }

    async fn redis_gate(&self, ip: &str, command: &str) -> std::result::Result<(), NodeError> {
        let health = self
            .lock()
            .redis
            .iter()
            .find(|n| n.pod.ip == ip)
            .map(|n| n.health.clone());
        self.gate(ip, health, command).await?;
        self.refusal(ip, command)
    }

    async fn sentinel_gate(&self, ip: &str, command: &str) -> std::result::Result<(), NodeError> {
        let health = self
            .lock()
            .sentinels
            .iter()
            .find(|n| n.pod.ip == ip)
            .map(|n| n.health.clone());
        self.gate(ip, health, command).await?;
        self.refusal(ip, command)
    }

    fn with_redis_node<T>(&self, ip: &str, f: impl FnOnce(&mut SimRedis) -> T) -> Option<T> {
        let mut state = self.lock();
        state.redis.iter_mut().find(|n| n.pod.ip == ip).map(f)
    }

    fn with_sentinel_node<T>(&self, ip: &str, f: impl FnOnce(&mut SimSentinel) -> T) -> Option<T> {
        let mut state = self.lock();
        state.sentinels.iter_mut().find(|n| n.pod.ip == ip).map(f)
    }
}

#[async_trait]
impl NodeClient for SimulatedCluster {
    async fn get_role(&self, ip: &str, _password: Option<&str>) -> std::result::Result<RedisRole, NodeError> {
        self.redis_gate(ip, "INFO").await?;
        Ok(self.with_redis_node(ip, |n| n.role.clone()).unwrap_or(RedisRole::Master))
    }

    async fn get_redis_config(
        &self,
        ip: &str,
        _password: Option<&str>,
        params: &[String],
    ) -> std::result::Result<BTreeMap<String, String>, NodeError> {
        self.redis_gate(ip, "CONFIG GET").await?;
        Ok(self
            .with_redis_node(ip, |n| {
                params
                    .iter()
                    .map(|p| (p.clone(), n.config.get(p).cloned().unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn make_master(&self, ip: &str, _password: Option<&str>) -> std::result::Result<(), NodeError> {
        self.redis_gate(ip, "SLAVEOF").await?;
        self.with_redis_node(ip, |n| n.role = RedisRole::Master);
        self.record(format!("SLAVEOF {} NO ONE", ip));
        Ok(())
    }

    async fn make_replica_of(
        &self,
        ip: &str,
        master_ip: &str,
        _password: Option<&str>,
    ) -> std::result::Result<(), NodeError> {
        self.redis_gate(ip, "SLAVEOF").await?;
        self.with_redis_node(ip, |n| n.role = replica_of(master_ip));
        self.record(format!("SLAVEOF {} {}", ip, master_ip));
        Ok(())
    }

    async fn set_redis_custom_config(
        &self,
        ip: &str,
        _password: Option<&str>,
        lines: &[String],
    ) -> std::result::Result<(), NodeError> {
        self.redis_gate(ip, "CONFIG SET").await?;
        self.with_redis_node(ip, |n| {
            for (param, value) in lines.iter().filter_map(|l| split_config_line(l)) {
                let stored = if param == "requirepass" || param == "masterauth" {
                    value
                } else {
                    normalize_config_value(&value)
                };
                n.config.insert(param, stored);
            }
        });
        self.record(format!("CONFIG SET {}", ip));
        Ok(())
    }

    async fn get_sentinel_monitor(&self, ip: &str) -> std::result::Result<SentinelMonitor, NodeError> {
        self.sentinel_gate(ip, "SENTINEL MASTER").await?;
        Ok(self
            .with_sentinel_node(ip, |n| n.monitor.clone())
            .unwrap_or_default())
    }

    async fn monitor_master(
        &self,
        ip: &str,
        master: &Endpoint,
        quorum: u32,
        _password: Option<&str>,
    ) -> std::result::Result<(), NodeError> {
        self.sentinel_gate(ip, "SENTINEL MONITOR").await?;
        self.with_sentinel_node(ip, |n| {
            n.monitor = SentinelMonitor {
                master: Some(master.clone()),
                quorum,
                known_sentinels: 1,
                known_replicas: 0,
                settings: BTreeMap::new(),
            };
        });
        self.record(format!("SENTINEL MONITOR {} {} {}", ip, master, quorum));
        Ok(())
    }

    async fn reset_sentinel(&self, ip: &str) -> std::result::Result<(), NodeError> {
        self.sentinel_gate(ip, "SENTINEL RESET").await?;
        self.with_sentinel_node(ip, |n| {
            n.monitor.known_sentinels = 1;
            n.monitor.known_replicas = 0;
        });
        self.record(format!("SENTINEL RESET {}", ip));
        Ok(())
    }

    async fn set_sentinel_custom_config(
        &self,
        ip: &str,
        lines: &[String],
    ) -> std::result::Result<(), NodeError> {
        self.sentinel_gate(ip, "SENTINEL SET").await?;
        self.with_sentinel_node(ip, |n| {
            for (param, value) in lines.iter().filter_map(|l| split_config_line(l)) {
                n.monitor.settings.insert(param, value);
            }
        });
        self.record(format!("SENTINEL SET {}", ip));
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for SimulatedCluster {
    async fn list_pods(&self, _namespace: &str, selector: &str) -> Result<Vec<PodInfo>> {
        let state = self.lock();
        if state.listing_fails {
            return Err(Error::ObjectStore("pod listing failed".to_string()));
        }
        let pods = if selector.contains("app.kubernetes.io/component=redis") {
            state.redis.iter().map(|n| n.pod.clone()).collect()
        } else if selector.contains("app.kubernetes.io/component=sentinel") {
            state.sentinels.iter().map(|n| n.pod.clone()).collect()
        } else {
            Vec::new()
        };
        Ok(pods)
    }

    async fn write_status(&self, _key: &ObjectKey, status: &RedisFailoverStatus) -> Result<()> {
        let mut state = self.lock();
        if state.status_write_fails {
            return Err(Error::StatusWrite("status subresource patch rejected".to_string()));
        }
        state.status = Some(status.clone());
        state.status_writes += 1;
        Ok(())
    }

    async fn exists(&self, _key: &ObjectKey) -> Result<bool> {
        Ok(!self.lock().gone)
    }

    async fn read_secret_key(&self, namespace: &str, name: &str, key: &str) -> Result<String> {
        self.lock()
            .secrets
            .get(&(name.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::ObjectStore(format!("secret {}/{} has no key '{}'", namespace, name, key))
            })
    }

    async fn enumerate_owned_objects(
        &self,
        key: &ObjectKey,
        _uid: &str,
        _selector: &str,
    ) -> Result<Vec<OwnedObject>> {
        Ok(self
            .lock()
            .owned
            .iter()
            .filter(|o| o.namespace == key.namespace)
            .cloned()
            .collect())
    }

    async fn delete_owned_object(&self, object: &OwnedObject) -> Result<()> {
        let mut state = self.lock();
        state.owned.retain(|o| o != object);
        state.deleted.push(object.clone());
        Ok(())
    }
}

impl SimulatedCluster {
    fn ensure(&self, kind: &'static str) -> Result<()> {
        let mut state = self.lock();
        if state.failing_ensure == Some(kind) {
            return Err(Error::ObjectStore(format!("apply {} failed", kind)));
        }
        state.ensured.push(kind);
        Ok(())
    }
}

#[async_trait]
impl Ensurer for SimulatedCluster {
    async fn ensure_redis_service(&self, _req: &EnsureRequest<'_>) -> Result<()> {
        self.ensure("redis-service")
    }

    async fn ensure_sentinel_service(&self, _req: &EnsureRequest<'_>) -> Result<()> {
        self.ensure("sentinel-service")
    }

    async fn ensure_sentinel_configmap(&self, _req: &EnsureRequest<'_>) -> Result<()> {
        self.ensure("sentinel-configmap")
    }

    async fn ensure_redis_shutdown_configmap(&self, _req: &EnsureRequest<'_>) -> Result<()> {
        self.ensure("redis-shutdown-configmap")
    }

    async fn ensure_redis_configmap(&self, _req: &EnsureRequest<'_>) -> Result<()> {
        self.ensure("redis-configmap")
    }

    async fn ensure_redis_statefulset(&self, _req: &EnsureRequest<'_>) -> Result<()> {
        self.ensure("redis-statefulset")
    }

    async fn ensure_sentinel_deployment(&self, _req: &EnsureRequest<'_>) -> Result<()> {
        self.ensure("sentinel-deployment")
    }

    async fn ensure_redis_pdb(&self, _req: &EnsureRequest<'_>) -> Result<()> {
        self.ensure("redis-pdb")
    }

    async fn ensure_sentinel_pdb(&self, _req: &EnsureRequest<'_>) -> Result<()> {
        self.ensure("sentinel-pdb")
    }

    async fn delete_owned(&self, failover: &RedisFailover) -> Result<usize> {
        delete_owned_objects(self, failover).await
    }
}
