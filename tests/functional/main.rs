// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the RedisFailover reconcile pass.
//!
//! These tests run real passes of the reconciler against an in-memory
//! cluster WITHOUT requiring Kubernetes or redis. The simulated cluster plays
//! the pod lister, the node client and the ensurer at once, so a test sets
//! up a topology, runs a pass and inspects what every node ended up with.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_no_master_promotes_oldest
//!
//! # Run with verbose output
//! cargo test --test functional -- --nocapture
//! ```
//!
//! ## Test Categories
//!
//! - **Pass tests**: master election, sentinel convergence, config drift,
//!   node failures and status writes
//! - **Heal tests**: each corrective operation against a converged node
//! - **Cleanup tests**: owned object deletion on instance removal

mod cleanup_tests;
mod pass_tests;
mod simulated_cluster;

pub use simulated_cluster::*;
