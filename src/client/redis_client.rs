//! Redis and sentinel node client using the fred crate.
//!
//! Every call opens a dedicated connection to one pod IP, runs its commands
//! and closes the connection again. Pod IPs change across restarts, so no
//! connection is cached between passes.

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use fred::error::{Error as FredError, ErrorKind};
use fred::prelude::*;
use fred::types::{InfoKind, Value};
use tracing::{debug, instrument};

use super::node_client::{NodeClient, NodeClientConfig, NodeError};
use super::parsing::{pairs_to_map, parse_role, parse_sentinel_master, split_config_line};
use super::types::{Endpoint, RedisRole, SentinelMonitor};

/// `NodeClient` implementation that speaks to real redis and sentinel pods.
#[derive(Clone, Debug, Default)]
pub struct RedisNodeClient {
    config: NodeClientConfig,
}

impl RedisNodeClient {
    /// Create a client with the given ports and timeouts.
    pub fn new(config: NodeClientConfig) -> Self {
        Self { config }
    }

    /// Get the client configuration.
    pub fn config(&self) -> &NodeClientConfig {
        &self.config
    }

    async fn connect(
        &self,
        ip: &str,
        port: u16,
        password: Option<&str>,
    ) -> Result<Client, NodeError> {
        let mut redis_config = Config {
            server: ServerConfig::Centralized {
                server: Server::new(ip, port),
            },
            ..Default::default()
        };
        if let Some(pass) = password {
            redis_config.password = Some(pass.to_string());
        }

        let command_timeout = self.config.command_timeout;
        let connection_timeout = self.config.connection_timeout;

        let client = Builder::from_config(redis_config)
            .with_performance_config(|perf| {
                perf.default_command_timeout = command_timeout;
            })
            .with_connection_config(|conn| {
                conn.connection_timeout = connection_timeout;
            })
            .build()
            .map_err(|e| self.classify(ip, "CONNECT", e))?;

        client
            .init()
            .await
            .map_err(|e| self.classify(ip, "CONNECT", e))?;
        Ok(client)
    }

    /// Run `op` on a fresh connection and close it afterwards.
    async fn with_node<T, F, Fut>(
        &self,
        ip: &str,
        port: u16,
        password: Option<&str>,
        command: &str,
        op: F,
    ) -> Result<T, NodeError>
    where
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = Result<T, FredError>>,
    {
        let client = self.connect(ip, port, password).await?;
        let result = op(client.clone()).await;
        if let Err(e) = client.quit().await {
            debug!(ip = %ip, error = %e, "Failed to close node connection");
        }
        result.map_err(|e| self.classify(ip, command, e))
    }

    fn classify(&self, ip: &str, command: &str, err: FredError) -> NodeError {
        match err.kind() {
            ErrorKind::Timeout => NodeError::Timeout {
                ip: ip.to_string(),
                duration: self.config.command_timeout,
            },
            ErrorKind::IO | ErrorKind::Canceled => NodeError::Unreachable {
                ip: ip.to_string(),
                reason: err.details().to_string(),
            },
            _ => NodeError::Rejected {
                ip: ip.to_string(),
                command: command.to_string(),
                reason: err.details().to_string(),
            },
        }
    }
}

fn is_no_such_master(err: &FredError) -> bool {
    err.details().to_ascii_lowercase().contains("no such master")
}

#[async_trait]
impl NodeClient for RedisNodeClient {
    #[instrument(skip(self, password))]
    async fn get_role(&self, ip: &str, password: Option<&str>) -> Result<RedisRole, NodeError> {
        let info: String = self
            .with_node(ip, self.config.redis_port, password, "INFO", |c| async move {
                c.info::<String>(Some(InfoKind::Replication)).await
            })
            .await?;

        parse_role(&info).map_err(|e| NodeError::Rejected {
            ip: ip.to_string(),
            command: "INFO".to_string(),
            reason: e.to_string(),
        })
    }

    #[instrument(skip(self, password, params), fields(param_count = params.len()))]
    async fn get_redis_config(
        &self,
        ip: &str,
        password: Option<&str>,
        params: &[String],
    ) -> Result<BTreeMap<String, String>, NodeError> {
        let params = params.to_vec();
        let replies: Vec<Vec<String>> = self
            .with_node(ip, self.config.redis_port, password, "CONFIG GET", |c| async move {
                let mut replies = Vec::with_capacity(params.len());
                for param in params {
                    let reply: Vec<String> = c
                        .custom(fred::cmd!("CONFIG"), vec!["GET".to_string(), param])
                        .await?;
                    replies.push(reply);
                }
                Ok(replies)
            })
            .await?;

        let mut applied = BTreeMap::new();
        for reply in replies {
            let pairs = pairs_to_map(&reply).map_err(|e| NodeError::Rejected {
                ip: ip.to_string(),
                command: "CONFIG GET".to_string(),
                reason: e.to_string(),
            })?;
            applied.extend(pairs);
        }
        Ok(applied)
    }

    #[instrument(skip(self, password))]
    async fn make_master(&self, ip: &str, password: Option<&str>) -> Result<(), NodeError> {
        self.with_node(ip, self.config.redis_port, password, "SLAVEOF", |c| async move {
            c.custom::<Value, String>(fred::cmd!("SLAVEOF"), vec!["NO".into(), "ONE".into()])
                .await
                .map(|_| ())
        })
        .await
    }

    #[instrument(skip(self, password))]
    async fn make_replica_of(
        &self,
        ip: &str,
        master_ip: &str,
        password: Option<&str>,
    ) -> Result<(), NodeError> {
        let master_ip = master_ip.to_string();
        let master_port = self.config.redis_port.to_string();
        let masterauth = password.map(str::to_string);

        self.with_node(ip, self.config.redis_port, password, "SLAVEOF", |c| async move {
            if let Some(pass) = masterauth {
                c.custom::<Value, String>(
                    fred::cmd!("CONFIG"),
                    vec!["SET".into(), "masterauth".into(), pass],
                )
                .await?;
            }
            c.custom::<Value, String>(fred::cmd!("SLAVEOF"), vec![master_ip, master_port])
                .await
                .map(|_| ())
        })
        .await
    }

    #[instrument(skip(self, password, lines), fields(line_count = lines.len()))]
    async fn set_redis_custom_config(
        &self,
        ip: &str,
        password: Option<&str>,
        lines: &[String],
    ) -> Result<(), NodeError> {
        let pairs: Vec<(String, String)> = lines
            .iter()
            .filter_map(|line| split_config_line(line))
            .collect();

        self.with_node(ip, self.config.redis_port, password, "CONFIG SET", |c| async move {
            for (param, value) in pairs {
                c.custom::<Value, String>(fred::cmd!("CONFIG"), vec!["SET".into(), param, value])
                    .await?;
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_sentinel_monitor(&self, ip: &str) -> Result<SentinelMonitor, NodeError> {
        let master_name = self.config.master_name.clone();
        let reply: Option<Vec<String>> = self
            .with_node(ip, self.config.sentinel_port, None, "SENTINEL MASTER", |c| async move {
                match c
                    .custom::<Vec<String>, String>(
                        fred::cmd!("SENTINEL"),
                        vec!["MASTER".into(), master_name],
                    )
                    .await
                {
                    Ok(reply) => Ok(Some(reply)),
                    Err(e) if is_no_such_master(&e) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await?;

        match reply {
            None => Ok(SentinelMonitor::unmonitored()),
            Some(reply) => parse_sentinel_master(&reply).map_err(|e| NodeError::Rejected {
                ip: ip.to_string(),
                command: "SENTINEL MASTER".to_string(),
                reason: e.to_string(),
            }),
        }
    }

    #[instrument(skip(self, password), fields(master = %master))]
    async fn monitor_master(
        &self,
        ip: &str,
        master: &Endpoint,
        quorum: u32,
        password: Option<&str>,
    ) -> Result<(), NodeError> {
        let master_name = self.config.master_name.clone();
        let master_ip = master.ip().to_string();
        let master_port = master.port().to_string();
        let auth_pass = password.map(str::to_string);

        self.with_node(ip, self.config.sentinel_port, None, "SENTINEL MONITOR", |c| async move {
            match c
                .custom::<Value, String>(
                    fred::cmd!("SENTINEL"),
                    vec!["REMOVE".into(), master_name.clone()],
                )
                .await
            {
                Ok(_) => {}
                Err(e) if is_no_such_master(&e) => {}
                Err(e) => return Err(e),
            }

            c.custom::<Value, String>(
                fred::cmd!("SENTINEL"),
                vec![
                    "MONITOR".into(),
                    master_name.clone(),
                    master_ip,
                    master_port,
                    quorum.to_string(),
                ],
            )
            .await?;

            if let Some(pass) = auth_pass {
                c.custom::<Value, String>(
                    fred::cmd!("SENTINEL"),
                    vec!["SET".into(), master_name, "auth-pass".into(), pass],
                )
                .await?;
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn reset_sentinel(&self, ip: &str) -> Result<(), NodeError> {
        self.with_node(ip, self.config.sentinel_port, None, "SENTINEL RESET", |c| async move {
            c.custom::<Value, String>(fred::cmd!("SENTINEL"), vec!["RESET".into(), "*".into()])
                .await
                .map(|_| ())
        })
        .await
    }

    #[instrument(skip(self, lines), fields(line_count = lines.len()))]
    async fn set_sentinel_custom_config(
        &self,
        ip: &str,
        lines: &[String],
    ) -> Result<(), NodeError> {
        let master_name = self.config.master_name.clone();
        let pairs: Vec<(String, String)> = lines
            .iter()
            .filter_map(|line| split_config_line(line))
            .collect();

        self.with_node(ip, self.config.sentinel_port, None, "SENTINEL SET", |c| async move {
            for (param, value) in pairs {
                c.custom::<Value, String>(
                    fred::cmd!("SENTINEL"),
                    vec!["SET".into(), master_name.clone(), param, value],
                )
                .await?;
            }
            Ok(())
        })
        .await
    }
}
