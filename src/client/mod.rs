//! Node client module for redis and sentinel commands.
//!
//! The controller never issues commands directly; it goes through the
//! [`NodeClient`] trait so the same checker and healer run against real pods
//! or an in-memory cluster.
//!
//! ## Architecture
//!
//! - `node_client`: the `NodeClient` trait and its typed `NodeError`
//! - `redis_client`: fred-backed implementation, one connection per call
//! - `types`: endpoints, replication roles and sentinel monitor views
//! - `parsing`: pure parsers for INFO, SENTINEL MASTER and CONFIG GET replies
//!
//! ## Example
//!
//! ```rust,ignore
//! use redis_failover_operator::client::{NodeClient, RedisNodeClient};
//!
//! let client = RedisNodeClient::default();
//! let role = client.get_role("10.0.0.5", None).await?;
//! if role.is_master() {
//!     println!("10.0.0.5 is master");
//! }
//! ```

pub mod node_client;
pub mod parsing;
pub mod redis_client;
pub mod types;

pub use node_client::{NodeClient, NodeClientConfig, NodeError};
pub use redis_client::RedisNodeClient;
pub use types::{DEFAULT_REDIS_PORT, DEFAULT_SENTINEL_PORT, Endpoint, RedisRole, SentinelMonitor};
