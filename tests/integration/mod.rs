//! Integration test suite for hush.
//!
//! These tests drive the governance engine end to end through its public
//! API: latency samples, send attempts, operator commands, and the durable
//! store underneath.
//!
//! # Test Categories
//!
//! - `governance_flow`: decision priority, buffering, flush and kill switch scenarios
//! - `store_durability`: on-disk persistence, restarts, degraded stores
//! - `concurrency`: inserts racing synthesis, concurrent senders and operators

mod fixtures;

mod concurrency;
mod store_durability;
