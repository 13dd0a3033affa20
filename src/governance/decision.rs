//! Buffering decision.
//!
//! `decide` is a pure function of the latency window, the threshold and the
//! operator overrides. Rules are checked in a fixed order and the first match
//! wins:
//!
//! 1. halted
//! 2. forced buffering
//! 3. simulated latency above threshold
//! 4. measured max latency above threshold
//! 5. healthy
//!
//! Threshold comparisons are strict: a latency equal to the threshold is healthy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use super::monitor::HealthMonitor;

/// Window used when no explicit one is configured.
pub const HEALTH_WINDOW: Duration = Duration::from_secs(60);

/// Process-wide operator overrides.
///
/// Always read and replaced as a whole so no caller observes a mix of old and
/// new flags.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemState {
    pub forced_buffering: bool,
    pub simulated_latency_ms: f64,
    pub halted: bool,
}

impl SystemState {
    pub fn with_halted(mut self, halted: bool) -> Self {
        self.halted = halted;
        self
    }

    pub fn with_forced_buffering(mut self, forced: bool) -> Self {
        self.forced_buffering = forced;
        self
    }

    pub fn with_simulated_latency(mut self, latency_ms: f64) -> Self {
        self.simulated_latency_ms = super::monitor::sanitize_latency(latency_ms);
        self
    }
}

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionReason {
    Halted,
    ManualOverride,
    SimulatedLatency { latency_ms: f64, threshold_ms: f64 },
    HighLatency { max_ms: f64, threshold_ms: f64 },
    Healthy,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionReason::Halted => write!(f, "halted"),
            DecisionReason::ManualOverride => write!(f, "manual override"),
            DecisionReason::SimulatedLatency {
                latency_ms,
                threshold_ms,
            } => write!(
                f,
                "simulated latency {}ms exceeds threshold {}ms",
                latency_ms, threshold_ms
            ),
            DecisionReason::HighLatency {
                max_ms,
                threshold_ms,
            } => write!(
                f,
                "max latency {}ms exceeds threshold {}ms",
                max_ms, threshold_ms
            ),
            DecisionReason::Healthy => write!(f, "healthy"),
        }
    }
}

/// Result of a buffering decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub buffering: bool,
    pub reason: DecisionReason,
    pub latency_ms: f64,
}

impl Decision {
    fn buffer(reason: DecisionReason, latency_ms: f64) -> Self {
        Self {
            buffering: true,
            reason,
            latency_ms,
        }
    }
}

/// Decide over the default 60 second window as of now.
pub fn decide(monitor: &HealthMonitor, threshold_ms: f64, state: &SystemState) -> Decision {
    decide_at(monitor, threshold_ms, state, HEALTH_WINDOW, Instant::now())
}

/// Decide over an explicit window and reference instant.
pub fn decide_at(
    monitor: &HealthMonitor,
    threshold_ms: f64,
    state: &SystemState,
    window: Duration,
    now: Instant,
) -> Decision {
    let simulated = state.simulated_latency_ms;

    if state.halted {
        return Decision::buffer(DecisionReason::Halted, 0.0);
    }

    if state.forced_buffering {
        let avg = monitor.average_at(window, simulated, now);
        return Decision::buffer(DecisionReason::ManualOverride, avg);
    }

    if simulated > threshold_ms {
        return Decision::buffer(
            DecisionReason::SimulatedLatency {
                latency_ms: simulated,
                threshold_ms,
            },
            simulated,
        );
    }

    let max = monitor.max_at(window, simulated, now);
    if max > threshold_ms {
        return Decision::buffer(
            DecisionReason::HighLatency {
                max_ms: max,
                threshold_ms,
            },
            max,
        );
    }

    Decision {
        buffering: false,
        reason: DecisionReason::Healthy,
        latency_ms: monitor.average_at(window, simulated, now),
    }
}
