//! redis-failover-operator entry point.
//!
//! Sets up JSON logging, loads [`OperatorConfig`] from the environment,
//! serves probes and metrics, and runs the controller once this replica
//! holds the leader lease.

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use redis_failover_operator::OperatorConfig;
use redis_failover_operator::health::{HealthState, run_health_server};
use redis_failover_operator::run_controller;

const LEASE_NAME: &str = "redis-failover-operator-leader";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Time given to in-flight passes after SIGTERM.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing()?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting redis-failover-operator");

    let client = Client::try_default().await?;
    let mut config = OperatorConfig::from_env();
    let holder_id = config.pod_name.clone().unwrap_or_else(|| {
        warn!("POD_NAME not set, falling back to hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    config.pod_name = Some(holder_id.clone());

    info!(
        holder_id = %holder_id,
        lease_namespace = %config.pod_namespace,
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("*"),
        node_timeout = ?config.node_timeout,
        resync_interval = ?config.resync_interval,
        "Loaded configuration"
    );

    // Probes answer before leadership so a standby replica stays live.
    let health_state = Arc::new(HealthState::new());
    let health = tokio::spawn({
        let health_state = health_state.clone();
        async move {
            if let Err(e) = run_health_server(health_state).await {
                error!(error = %e, "Health server failed");
            }
        }
    });

    let lease = lease_lock(&client, &config.pod_namespace, &holder_id);
    acquire_leadership(&lease).await;
    let renewal = tokio::spawn(renew_leadership(lease));

    let controller = tokio::spawn(run_controller(client, config, Some(health_state.clone())));

    tokio::select! {
        result = controller => {
            if let Err(e) = result {
                error!(error = %e, "Controller task panicked");
            }
        }
        result = health => {
            if let Err(e) = result {
                error!(error = %e, "Health server task panicked");
            }
        }
        Err(e) = renewal => {
            error!(error = %e, "Lease renewal task panicked");
        }
        _ = shutdown_signal() => {
            info!(grace_period = ?SHUTDOWN_GRACE_PERIOD, "Shutdown requested");
            health_state.set_ready(false).await;
            tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::from_default_env()
        .add_directive("redis_failover_operator=info".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("kube_leader_election=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
    Ok(())
}

fn lease_lock(client: &Client, namespace: &str, holder_id: &str) -> LeaseLock {
    LeaseLock::new(
        client.clone(),
        namespace,
        LeaseLockParams {
            holder_id: holder_id.to_string(),
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: LEASE_TTL,
        },
    )
}

/// Block until this replica holds the lease.
async fn acquire_leadership(lease: &LeaseLock) {
    info!(lease = LEASE_NAME, "Waiting for leadership");
    loop {
        match lease.try_acquire_or_renew().await {
            Ok(result) if matches!(result, LeaseLockResult::Acquired(_)) => {
                info!(lease = LEASE_NAME, "Acquired leadership");
                return;
            }
            Ok(_) => info!("Another replica holds the lease"),
            Err(e) => warn!(error = %e, "Lease acquisition failed, retrying"),
        }
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
    }
}

/// Keep renewing the lease; exit the process the moment it is lost so the
/// pod restarts and rejoins the election.
#[allow(clippy::exit)]
async fn renew_leadership(lease: LeaseLock) {
    loop {
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
        match lease.try_acquire_or_renew().await {
            Ok(result) if matches!(result, LeaseLockResult::Acquired(_)) => {}
            Ok(_) => {
                error!("Lost leadership, exiting");
                std::process::exit(1);
            }
            Err(e) => {
                error!(error = %e, "Lease renewal failed, exiting");
                std::process::exit(1);
            }
        }
    }
}

/// Wait for SIGTERM or SIGINT.
///
/// Failing to install a handler is fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
