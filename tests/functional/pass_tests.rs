//! Full reconcile passes over simulated topologies.

use std::sync::Arc;

use redis_failover_operator::client::{Endpoint, RedisRole, SentinelMonitor};
use redis_failover_operator::controller::checker::{Checker, Discrepancy};
use redis_failover_operator::controller::error::Error;
use redis_failover_operator::controller::healer::HealAction;
use redis_failover_operator::crd::{AuthSpec, SecretKeyRef};

use crate::*;

fn unassigned() -> RedisRole {
    RedisRole::Replica { master: None }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_converged_cluster_issues_no_commands() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    let outcome = reconciler(&sim).run_pass(&failover("cache")).await.unwrap();

    assert!(outcome.discrepancies.is_empty());
    assert!(outcome.actions.is_empty());
    assert!(sim.commands().is_empty());

    let status = sim.status().unwrap();
    assert_eq!(status.redis_nodes.len(), 3);
    assert_eq!(status.sentinel_nodes.len(), 3);
    assert_eq!(status.redis_nodes.iter().filter(|n| n.is_master).count(), 1);
    assert!(status.redis_nodes[0].is_master);
    assert_eq!(status.redis_nodes[0].pod_ip, "10.0.0.1");
    assert_eq!(sim.status_writes(), 1);
}

#[tokio::test]
async fn test_every_managed_object_is_ensured_in_order() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    reconciler(&sim).run_pass(&failover("cache")).await.unwrap();

    assert_eq!(
        sim.ensured(),
        vec![
            "redis-service",
            "sentinel-service",
            "sentinel-configmap",
            "redis-shutdown-configmap",
            "redis-configmap",
            "redis-statefulset",
            "sentinel-deployment",
            "redis-pdb",
            "sentinel-pdb",
        ]
    );
}

#[tokio::test]
async fn test_no_master_promotes_oldest() {
    let sim = Arc::new(
        SimulatedCluster::new()
            .with_redis("rfr-cache-0", "10.0.0.1", 20, unassigned())
            .with_redis("rfr-cache-1", "10.0.0.2", 10, unassigned())
            .with_redis("rfr-cache-2", "10.0.0.3", 30, unassigned())
            .with_sentinel("rfs-cache-a", "10.0.1.1", 0, SentinelMonitor::unmonitored())
            .with_sentinel("rfs-cache-b", "10.0.1.2", 1, SentinelMonitor::unmonitored())
            .with_sentinel("rfs-cache-c", "10.0.1.3", 2, SentinelMonitor::unmonitored()),
    );

    let outcome = reconciler(&sim).run_pass(&failover("cache")).await.unwrap();

    assert!(outcome.discrepancies.contains(&Discrepancy::NoMaster));
    assert_eq!(
        outcome.actions[0],
        HealAction::PromotedMaster {
            ip: "10.0.0.2".to_string()
        }
    );
    assert_eq!(sim.masters(), vec!["10.0.0.2".to_string()]);
    assert_eq!(sim.role_of("10.0.0.1"), replica_of("10.0.0.2"));
    assert_eq!(sim.role_of("10.0.0.3"), replica_of("10.0.0.2"));

    let master = Endpoint::new("10.0.0.2", REDIS_PORT);
    for ip in sim.sentinel_ips() {
        assert!(sim.monitor_of(&ip).monitors(&master, 2), "{} not monitoring", ip);
    }

    let status = sim.status().unwrap();
    let masters: Vec<_> = status.redis_nodes.iter().filter(|n| n.is_master).collect();
    assert_eq!(masters.len(), 1);
    assert_eq!(masters[0].pod_ip, "10.0.0.2");
}

#[tokio::test]
async fn test_creation_tie_broken_by_pod_name() {
    let sim = Arc::new(
        SimulatedCluster::new()
            .with_redis("rfr-cache-1", "10.0.0.2", 5, unassigned())
            .with_redis("rfr-cache-0", "10.0.0.1", 5, unassigned()),
    );

    reconciler(&sim).run_pass(&failover("cache")).await.unwrap();

    assert_eq!(sim.masters(), vec!["10.0.0.1".to_string()]);
    assert_eq!(sim.role_of("10.0.0.2"), replica_of("10.0.0.1"));
}

#[tokio::test]
async fn test_multiple_masters_keeps_oldest() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    sim.set_role("10.0.0.2", RedisRole::Master);

    let outcome = reconciler(&sim).run_pass(&failover("cache")).await.unwrap();

    assert!(outcome.discrepancies.iter().any(|d| matches!(
        d,
        Discrepancy::MultipleMasters { masters } if masters.len() == 2
    )));
    assert_eq!(
        outcome.actions,
        vec![HealAction::RepointedReplica {
            ip: "10.0.0.2".to_string(),
            master: "10.0.0.1".to_string(),
        }]
    );
    assert_eq!(sim.masters(), vec!["10.0.0.1".to_string()]);
    assert_eq!(sim.role_of("10.0.0.3"), replica_of("10.0.0.1"));
}

#[tokio::test]
async fn test_misrouted_replica_is_repointed() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    sim.set_role("10.0.0.3", replica_of("10.0.0.9"));

    let outcome = reconciler(&sim).run_pass(&failover("cache")).await.unwrap();

    assert_eq!(
        outcome.discrepancies,
        vec![Discrepancy::ReplicaMisrouted {
            ip: "10.0.0.3".to_string()
        }]
    );
    assert_eq!(sim.commands(), vec!["SLAVEOF 10.0.0.3 10.0.0.1".to_string()]);
    assert_eq!(sim.role_of("10.0.0.3"), replica_of("10.0.0.1"));
}

#[tokio::test]
async fn test_misconfigured_sentinel_converges_in_one_pass() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    sim.set_monitor("10.0.1.2", monitoring("10.0.0.7", 2, 3, 2));
    sim.set_monitor("10.0.1.3", monitoring("10.0.0.1", 1, 3, 2));
    let reconciler = reconciler(&sim);

    let outcome = reconciler.run_pass(&failover("cache")).await.unwrap();
    assert_eq!(
        outcome
            .actions
            .iter()
            .filter(|a| matches!(a, HealAction::MonitoredMaster { .. }))
            .count(),
        2
    );
    let master = Endpoint::new("10.0.0.1", REDIS_PORT);
    for ip in sim.sentinel_ips() {
        assert!(sim.monitor_of(&ip).monitors(&master, 2));
    }

    sim.clear_commands();
    let second = reconciler.run_pass(&failover("cache")).await.unwrap();
    assert!(second.actions.is_empty());
    assert!(sim.commands().is_empty());
}

#[tokio::test]
async fn test_stale_sentinel_is_reset_only() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    sim.set_monitor("10.0.1.1", monitoring("10.0.0.1", 2, 5, 2));

    let outcome = reconciler(&sim).run_pass(&failover("cache")).await.unwrap();

    assert_eq!(
        outcome.discrepancies,
        vec![Discrepancy::SentinelNeedsReset {
            ip: "10.0.1.1".to_string()
        }]
    );
    assert_eq!(
        outcome.actions,
        vec![HealAction::RestoredSentinel {
            ip: "10.0.1.1".to_string()
        }]
    );
    assert_eq!(sim.commands(), vec!["SENTINEL RESET 10.0.1.1".to_string()]);
}

#[tokio::test]
async fn test_quorum_follows_reachable_sentinels() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 5));
    for ip in ["10.0.1.1", "10.0.1.2", "10.0.1.3", "10.0.1.4", "10.0.1.5"] {
        sim.set_monitor(ip, SentinelMonitor::unmonitored());
    }
    sim.set_health("10.0.1.5", Health::Unreachable);

    reconciler(&sim).run_pass(&failover("cache")).await.unwrap();

    // 4 reachable sentinels
    assert_eq!(sim.monitor_of("10.0.1.1").quorum, 3);
    assert!(sim.monitor_of("10.0.1.5").master.is_none());
}

#[tokio::test]
async fn test_unreachable_replica_does_not_fail_pass() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    sim.set_health("10.0.0.3", Health::Unreachable);

    let outcome = reconciler(&sim).run_pass(&failover("cache")).await.unwrap();

    assert!(outcome.discrepancies.iter().any(|d| matches!(
        d,
        Discrepancy::NodeUnreachable { ip, .. } if ip == "10.0.0.3"
    )));
    assert!(outcome.actions.is_empty());

    let status = sim.status().unwrap();
    assert_eq!(status.redis_nodes.len(), 2);
    assert!(status.redis_nodes.iter().all(|n| n.pod_ip != "10.0.0.3"));
}

#[tokio::test]
async fn test_unreachable_node_skipped_during_election() {
    let sim = Arc::new(
        SimulatedCluster::new()
            .with_redis("rfr-cache-0", "10.0.0.1", 0, unassigned())
            .with_redis("rfr-cache-1", "10.0.0.2", 1, unassigned())
            .with_redis("rfr-cache-2", "10.0.0.3", 2, unassigned()),
    );
    sim.set_health("10.0.0.3", Health::Unreachable);

    reconciler(&sim).run_pass(&failover("cache")).await.unwrap();

    assert_eq!(sim.masters(), vec!["10.0.0.1".to_string()]);
    assert_eq!(sim.role_of("10.0.0.2"), replica_of("10.0.0.1"));
    assert_eq!(sim.role_of("10.0.0.3"), unassigned());
}

#[tokio::test]
async fn test_unreachable_election_target_fails_pass() {
    let sim = Arc::new(
        SimulatedCluster::new()
            .with_redis("rfr-cache-0", "10.0.0.1", 0, replica_of("10.0.0.1"))
            .with_redis("rfr-cache-1", "10.0.0.2", 1, replica_of("10.0.0.1"))
            .with_redis("rfr-cache-2", "10.0.0.3", 2, replica_of("10.0.0.1")),
    );
    sim.set_health("10.0.0.1", Health::Unreachable);

    let result = reconciler(&sim).run_pass(&failover("cache")).await;

    assert!(matches!(result, Err(Error::NodeUnreachable(_))));
    assert!(sim.masters().is_empty());
    assert_eq!(sim.status_writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_node_is_bounded_by_timeout() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    sim.set_health("10.0.0.2", Health::Hanging);

    let outcome = reconciler(&sim).run_pass(&failover("cache")).await.unwrap();

    assert!(outcome.discrepancies.iter().any(|d| matches!(
        d,
        Discrepancy::NodeUnreachable { ip, .. } if ip == "10.0.0.2"
    )));
    let status = sim.status().unwrap();
    assert_eq!(status.redis_nodes.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_redis_and_sentinel_queries_share_one_timeout_window() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    sim.set_health("10.0.0.2", Health::Hanging);
    sim.set_health("10.0.1.1", Health::Hanging);

    let started = tokio::time::Instant::now();
    let (topology, discrepancies) = Checker::new(sim.as_ref(), sim.as_ref(), NODE_TIMEOUT, REDIS_PORT)
        .check(&failover("cache"), None)
        .await
        .unwrap();

    assert!(started.elapsed() < NODE_TIMEOUT * 2);
    assert_eq!(topology.reachable_redis().count(), 2);
    assert_eq!(topology.reachable_sentinels().count(), 2);
    let unreachable: Vec<_> = discrepancies
        .iter()
        .filter_map(|d| match d {
            Discrepancy::NodeUnreachable { ip, .. } => Some(ip.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(unreachable.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_redis_role_and_config_queries_are_bounded_together() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    sim.set_health("10.0.0.2", Health::Slow);
    sim.set_health("10.0.1.1", Health::Slow);
    let mut failover = failover("cache");
    failover.spec.redis.custom_config = strings(&["maxmemory 100mb"]);

    let (_, discrepancies) = Checker::new(sim.as_ref(), sim.as_ref(), NODE_TIMEOUT, REDIS_PORT)
        .check(&failover, None)
        .await
        .unwrap();

    // two slow answers add up past the per-node bound; one does not
    let unreachable = |target: &str| {
        discrepancies
            .iter()
            .any(|d| matches!(d, Discrepancy::NodeUnreachable { ip, .. } if ip == target))
    };
    assert!(unreachable("10.0.0.2"));
    assert!(!unreachable("10.0.1.1"));
}

#[tokio::test]
async fn test_rejected_query_fails_pass_before_healing() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    sim.set_role("10.0.0.2", RedisRole::Master);
    sim.set_health("10.0.0.3", Health::Rejecting);

    let result = reconciler(&sim).run_pass(&failover("cache")).await;

    match result {
        Err(Error::ProtocolRejected(err)) => assert_eq!(err.ip(), "10.0.0.3"),
        other => panic!("expected a rejection, got {:?}", other.map(|o| o.actions)),
    }
    assert!(sim.commands().is_empty());
    assert_eq!(sim.status_writes(), 0);
}

#[tokio::test]
async fn test_config_drift_is_corrected_then_stable() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    sim.set_redis_config("10.0.0.1", "maxmemory", "1048576");
    sim.set_redis_config("10.0.0.1", "save", "900 1 300 10");
    let mut failover = failover("cache");
    failover.spec.redis.custom_config = strings(&["maxmemory 1mb", "save 900 1", "save 300 10"]);
    let reconciler = reconciler(&sim);

    let outcome = reconciler.run_pass(&failover).await.unwrap();
    let mut applied: Vec<_> = outcome
        .actions
        .iter()
        .filter_map(|a| match a {
            HealAction::AppliedRedisConfig { ip } => Some(ip.as_str()),
            _ => None,
        })
        .collect();
    applied.sort();
    assert_eq!(applied, vec!["10.0.0.2", "10.0.0.3"]);
    assert_eq!(sim.redis_config("10.0.0.2")["maxmemory"], "1048576");
    assert_eq!(sim.redis_config("10.0.0.3")["save"], "900 1 300 10");

    sim.clear_commands();
    let second = reconciler.run_pass(&failover).await.unwrap();
    assert!(second.discrepancies.is_empty());
    assert!(sim.commands().is_empty());
}

#[tokio::test]
async fn test_sentinel_config_reapplied_after_monitor() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    sim.set_monitor("10.0.1.2", monitoring("10.0.0.7", 2, 3, 2));
    let mut failover = failover("cache");
    failover.spec.sentinel.custom_config = strings(&["down-after-milliseconds 5000"]);
    let reconciler = reconciler(&sim);

    let outcome = reconciler.run_pass(&failover).await.unwrap();

    let applied = outcome
        .actions
        .iter()
        .filter(|a| matches!(a, HealAction::AppliedSentinelConfig { .. }))
        .count();
    assert_eq!(applied, 3);
    for ip in sim.sentinel_ips() {
        assert_eq!(
            sim.monitor_of(&ip).settings.get("down-after-milliseconds"),
            Some(&"5000".to_string())
        );
    }

    let second = reconciler.run_pass(&failover).await.unwrap();
    assert!(second.actions.is_empty());
}

#[tokio::test]
async fn test_password_from_secret_is_pushed() {
    let sim = Arc::new(SimulatedCluster::healthy(2, 3));
    sim.add_secret("cache-auth", "password", "s3cret");
    let mut failover = failover("cache");
    failover.spec.redis.auth = Some(AuthSpec {
        secret_ref: SecretKeyRef {
            name: "cache-auth".to_string(),
            key: "password".to_string(),
        },
    });
    let reconciler = reconciler(&sim);

    reconciler.run_pass(&failover).await.unwrap();
    for ip in ["10.0.0.1", "10.0.0.2"] {
        let config = sim.redis_config(ip);
        assert_eq!(config["requirepass"], "s3cret");
        assert_eq!(config["masterauth"], "s3cret");
    }

    let second = reconciler.run_pass(&failover).await.unwrap();
    assert!(second.actions.is_empty());
}

#[tokio::test]
async fn test_missing_secret_fails_before_ensuring() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    let mut failover = failover("cache");
    failover.spec.redis.auth = Some(AuthSpec {
        secret_ref: SecretKeyRef {
            name: "absent".to_string(),
            key: "password".to_string(),
        },
    });

    let result = reconciler(&sim).run_pass(&failover).await;

    assert!(matches!(result, Err(Error::ObjectStore(_))));
    assert!(sim.ensured().is_empty());
}

#[tokio::test]
async fn test_invalid_spec_touches_nothing() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    let mut failover = failover("cache");
    failover.spec.redis.replicas = 0;

    let result = reconciler(&sim).run_pass(&failover).await;

    assert!(matches!(result, Err(Error::Validation(_))));
    assert!(sim.ensured().is_empty());
    assert!(sim.commands().is_empty());
    assert_eq!(sim.status_writes(), 0);
}

#[tokio::test]
async fn test_ensure_failure_aborts_pass() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    sim.set_role("10.0.0.2", RedisRole::Master);
    sim.fail_ensure("redis-statefulset");

    let result = reconciler(&sim).run_pass(&failover("cache")).await;

    assert!(result.is_err());
    assert_eq!(sim.ensured().len(), 5);
    assert!(sim.commands().is_empty());
    assert_eq!(sim.status_writes(), 0);
}

#[tokio::test]
async fn test_refused_repoint_fails_pass_before_sentinels() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    sim.set_role("10.0.0.2", RedisRole::Master);
    sim.set_monitor("10.0.1.1", monitoring("10.0.0.2", 2, 3, 2));
    sim.fail_command("SLAVEOF", "10.0.0.2");
    let mut failover = failover("cache");
    failover.spec.redis.custom_config = strings(&["maxmemory 100mb"]);

    let result = reconciler(&sim).run_pass(&failover).await;

    match result {
        Err(Error::ProtocolRejected(err)) => assert_eq!(err.ip(), "10.0.0.2"),
        other => panic!("expected a refused SLAVEOF, got {:?}", other.map(|o| o.actions)),
    }
    assert_eq!(sim.masters(), strings(&["10.0.0.1", "10.0.0.2"]));
    assert!(
        sim.commands()
            .iter()
            .all(|c| !c.starts_with("SENTINEL") && !c.starts_with("CONFIG")),
        "commands after the failed re-point: {:?}",
        sim.commands()
    );
    assert_eq!(sim.monitor_of("10.0.1.1").master, Some(Endpoint::new("10.0.0.2", REDIS_PORT)));
    assert_eq!(sim.status_writes(), 0);
}

#[tokio::test]
async fn test_failed_status_write_keeps_healing() {
    let sim = Arc::new(
        SimulatedCluster::new()
            .with_redis("rfr-cache-0", "10.0.0.1", 0, unassigned())
            .with_redis("rfr-cache-1", "10.0.0.2", 1, unassigned())
            .with_redis("rfr-cache-2", "10.0.0.3", 2, unassigned()),
    );
    sim.fail_status_write();

    let result = reconciler(&sim).run_pass(&failover("cache")).await;

    let err = match result {
        Err(err @ Error::StatusWrite(_)) => err,
        other => panic!("expected a status write failure, got {:?}", other.map(|o| o.actions)),
    };
    assert!(err.is_retryable());
    assert_eq!(sim.masters(), strings(&["10.0.0.1"]));
    assert_eq!(sim.role_of("10.0.0.2"), replica_of("10.0.0.1"));
    assert_eq!(sim.role_of("10.0.0.3"), replica_of("10.0.0.1"));
    assert!(sim.status().is_none());
    assert_eq!(sim.status_writes(), 0);
}

#[tokio::test]
async fn test_listing_failure_aborts_pass() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    sim.fail_listing();

    let result = reconciler(&sim).run_pass(&failover("cache")).await;

    assert!(matches!(result, Err(Error::ObjectStore(_))));
    assert_eq!(sim.status_writes(), 0);
}

#[tokio::test]
async fn test_deleted_resource_skips_status_write() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    sim.set_gone();

    let outcome = reconciler(&sim).run_pass(&failover("cache")).await.unwrap();

    assert!(outcome.status.is_none());
    assert_eq!(sim.status_writes(), 0);
}

#[tokio::test]
async fn test_no_pods_writes_empty_status() {
    let sim = Arc::new(SimulatedCluster::new());

    let outcome = reconciler(&sim).run_pass(&failover("cache")).await.unwrap();

    assert!(outcome.discrepancies.is_empty());
    assert!(outcome.actions.is_empty());
    let status = sim.status().unwrap();
    assert!(status.redis_nodes.is_empty());
    assert!(status.sentinel_nodes.is_empty());
}

#[tokio::test]
async fn test_status_is_replaced_each_pass() {
    let sim = Arc::new(SimulatedCluster::healthy(3, 3));
    let reconciler = reconciler(&sim);

    reconciler.run_pass(&failover("cache")).await.unwrap();
    sim.set_health("10.0.1.3", Health::Unreachable);
    reconciler.run_pass(&failover("cache")).await.unwrap();

    let status = sim.status().unwrap();
    assert_eq!(status.sentinel_nodes.len(), 2);
    assert_eq!(sim.status_writes(), 2);
}
