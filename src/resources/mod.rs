//! Resource generation and object access.
//!
//! Contains the generators for every Kubernetes object owned by a
//! RedisFailover, plus the `ObjectStore` and `Ensurer` seams the reconciler
//! goes through.
//!
//! ## Resources Generated
//!
//! | Resource | Name | Purpose |
//! |----------|------|---------|
//! | Service | `rfs-<name>` | Sentinel endpoint |
//! | Headless Service | `rfr-<name>` | Per-pod DNS for redis |
//! | ConfigMap | `rfs-<name>` | `sentinel.conf` |
//! | ConfigMap | `rfr-<name>` | `redis.conf` |
//! | ConfigMap | `rfr-s-<name>` | `shutdown.sh` preStop script |
//! | StatefulSet | `rfr-<name>` | Redis nodes |
//! | Deployment | `rfs-<name>` | Sentinel nodes |
//! | PodDisruptionBudget | `rfr-<name>`, `rfs-<name>` | Keep a majority of each role |

pub mod common;
pub mod configmaps;
pub mod deployment;
pub mod ensurer;
pub mod pdb;
pub mod pod;
pub mod services;
pub mod statefulset;
pub mod store;

// Re-export commonly used items
pub use common::{owner_reference, standard_labels};
pub use ensurer::{EnsureRequest, Ensurer, KubeEnsurer, delete_owned_objects};
pub use store::{KubeObjectStore, ObjectKey, ObjectStore, OwnedKind, OwnedObject, PodInfo};
