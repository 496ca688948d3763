//! Custom Resource Definitions for redis-failover-operator.
//!
//! - `RedisFailover`: a Redis master/replica group supervised by Sentinel

mod redis_failover;

pub use redis_failover::*;
