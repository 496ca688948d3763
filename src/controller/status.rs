//! Status construction.
//!
//! The status is rebuilt from scratch every pass; nothing from the previous
//! status is carried over.

use crate::controller::topology::{oldest_first, sort_oldest_first};
use crate::crd::{RedisFailoverStatus, RedisNode, SentinelNode};
use crate::resources::store::PodInfo;

/// Builder for a [`RedisFailoverStatus`].
#[derive(Default)]
pub struct StatusBuilder {
    redis: Vec<(PodInfo, bool)>,
    sentinels: Vec<PodInfo>,
}

impl StatusBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reachable redis node
    pub fn redis(&mut self, pod: &PodInfo, is_master: bool) -> &mut Self {
        self.redis.push((pod.clone(), is_master));
        self
    }

    /// Add a reachable sentinel
    pub fn sentinel(&mut self, pod: &PodInfo) -> &mut Self {
        self.sentinels.push(pod.clone());
        self
    }

    /// Build the status, both lists oldest pod first
    pub fn build(&self) -> RedisFailoverStatus {
        let mut redis = self.redis.clone();
        redis.sort_by(|(a, _), (b, _)| oldest_first(a, b));
        let mut sentinels = self.sentinels.clone();
        sort_oldest_first(&mut sentinels);

        RedisFailoverStatus {
            redis_nodes: redis
                .into_iter()
                .map(|(pod, is_master)| RedisNode {
                    pod_ip: pod.ip,
                    host_ip: pod.host_ip,
                    is_master,
                })
                .collect(),
            sentinel_nodes: sentinels
                .into_iter()
                .map(|pod| SentinelNode {
                    pod_ip: pod.ip,
                    host_ip: pod.host_ip,
                })
                .collect(),
        }
    }
}
