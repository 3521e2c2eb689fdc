//! Test module for starwire-core
//!
//! This module contains tests for:
//! - Dispatching inbound commands into the device model
//! - Device creation, removal and label assignment
//! - Connection lifecycle against real sockets (handshake, retries, teardown)
//! - Outbound commands and blob uploads
//! - Configuration loading and defaults

// Test modules use exact float comparisons
#![allow(clippy::float_cmp)]

mod config_tests;
mod dispatch_tests;
