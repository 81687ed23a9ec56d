//! warpsync Test Harness - multi-party scenarios in one process
//!
//! This crate provides:
//! - A loopback cluster: one server and any number of client coordinators
//!   on a shared manual clock
//! - Seeded interleaving of client traffic
//! - Tracing setup for test runs
//! - End-to-end scenarios

pub mod trace;
pub mod harness;
pub mod integration;

pub use trace::*;
pub use harness::*;
