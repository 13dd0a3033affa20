//! Latency governance engine.
//!
//! Components, leaves first:
//! - [`HealthMonitor`]: rolling latency window
//! - [`decide`]: pure buffering decision over monitor + overrides
//! - [`synthesize`]: coalesces a backlog into one prompt
//! - [`GovernanceController`]: routes send attempts, owns the kill switch

mod controller;
mod decision;
mod monitor;
mod synth;

pub use controller::{
    AgentSynthesis, BufferOutcome, Evaluation, FlushOutcome, FlushTarget, GovernanceConfig,
    GovernanceController, GovernanceEvent, GovernanceMode, GovernanceStatus, LatencyRecord,
    ModeTransition, PurgeOutcome, SendRoute,
};
pub use decision::{decide, decide_at, Decision, DecisionReason, SystemState, HEALTH_WINDOW};
pub use monitor::{sanitize_latency, HealthMonitor, LatencySample};
pub use synth::{escape_content, synthesize, NOTHING_TO_SYNTHESIZE};
