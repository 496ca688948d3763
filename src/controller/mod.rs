//! Controller module for redis-failover-operator.
//!
//! Contains the reconcile pass (check, heal, status), error handling,
//! configuration and validation logic.

pub mod checker;
pub mod common;
pub mod config;
pub mod context;
pub mod error;
pub mod healer;
pub mod reconciler;
pub mod status;
pub mod topology;
pub mod validation;
