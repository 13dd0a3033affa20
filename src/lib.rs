//! hush: outbound message governance for autonomous agents.
//!
//! When downstream latency crosses a threshold, or an operator says so,
//! agent messages are diverted into a durable priority queue instead of
//! being sent. Once the link recovers, or on an explicit flush, each agent's
//! backlog is coalesced into a single synthesized prompt.

pub mod actors;
pub mod config;
pub mod error;
pub mod governance;
pub mod log;
pub mod store;
pub mod util;

pub use error::{Error, Result};
pub use governance::{GovernanceController, GovernanceMode};
pub use store::{Priority, ThoughtStore};
