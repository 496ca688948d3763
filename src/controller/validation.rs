//! Validation logic for RedisFailover specs.
//!
//! Runs before anything is applied; a failure aborts the pass with
//! `Error::Validation`. Checks:
//! - Instance name length (generated names must stay within DNS limits)
//! - Replica counts for both roles
//! - Custom config lines are `parameter value`
//! - Custom config does not touch operator-managed parameters
//! - Credential source is unambiguous

use kube::ResourceExt;

use crate::client::parsing::split_config_line;
use crate::controller::error::{Error, Result};
use crate::crd::RedisFailover;

/// Maximum instance name length; `rfr-s-` plus the name must stay a valid label.
pub const MAX_NAME_LENGTH: usize = 48;

/// Minimum number of replicas per role
pub const MIN_REPLICAS: i32 = 1;

/// Maximum number of replicas per role
pub const MAX_REPLICAS: i32 = 100;

/// Redis parameters owned by the operator.
pub const MANAGED_REDIS_PARAMS: &[&str] = &["requirepass", "masterauth", "slaveof", "replicaof"];

/// Sentinel parameters owned by the operator.
pub const MANAGED_SENTINEL_PARAMS: &[&str] = &["monitor", "auth-pass"];

/// Validate the resource spec
pub fn validate_spec(resource: &RedisFailover) -> Result<()> {
    validate_name(&resource.name_any())?;
    validate_replicas("redis", resource.spec.redis.replicas)?;
    validate_replicas("sentinel", resource.spec.sentinel.replicas)?;
    validate_custom_config(
        "redis",
        &resource.spec.redis.custom_config,
        MANAGED_REDIS_PARAMS,
    )?;
    validate_custom_config(
        "sentinel",
        &resource.spec.sentinel.custom_config,
        MANAGED_SENTINEL_PARAMS,
    )?;
    validate_auth(resource)?;
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LENGTH {
        return Err(Error::Validation(format!(
            "name '{}' is {} characters, maximum is {}",
            name,
            name.len(),
            MAX_NAME_LENGTH
        )));
    }
    Ok(())
}

fn validate_replicas(role: &str, replicas: i32) -> Result<()> {
    if replicas < MIN_REPLICAS {
        return Err(Error::Validation(format!(
            "{}.replicas {} is below minimum {}",
            role, replicas, MIN_REPLICAS
        )));
    }

    if replicas > MAX_REPLICAS {
        return Err(Error::Validation(format!(
            "{}.replicas {} exceeds maximum {}",
            role, replicas, MAX_REPLICAS
        )));
    }

    Ok(())
}

fn validate_custom_config(role: &str, lines: &[String], managed: &[&str]) -> Result<()> {
    for line in lines {
        let (param, _) = split_config_line(line).ok_or_else(|| {
            Error::Validation(format!(
                "{}.customConfig line '{}' must be '<parameter> <value>'",
                role, line
            ))
        })?;
        if managed.contains(&param.as_str()) {
            return Err(Error::Validation(format!(
                "{}.customConfig may not set '{}', it is managed by the operator",
                role, param
            )));
        }
    }
    Ok(())
}

fn validate_auth(resource: &RedisFailover) -> Result<()> {
    let redis = &resource.spec.redis;
    if let Some(auth) = &redis.auth {
        if resource.spec.inline_password().is_some() {
            return Err(Error::Validation(
                "redis.password and redis.auth.secretRef are mutually exclusive".to_string(),
            ));
        }
        if auth.secret_ref.name.is_empty() || auth.secret_ref.key.is_empty() {
            return Err(Error::Validation(
                "redis.auth.secretRef requires both name and key".to_string(),
            ));
        }
    }
    Ok(())
}
