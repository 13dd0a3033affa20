//! Governance controller and kill switch.
//!
//! The `GovernanceController` is the single entry point for send attempts,
//! latency samples and operator commands. It owns the operator overrides as
//! one [`SystemState`] value, asks [`decide_at`] what to do, routes messages
//! to the [`ThoughtStore`] or back to the transport, and flushes the queue
//! through the synthesizer when the link recovers.
//!
//! Modes:
//!
//! ```text
//!   NORMAL ──buffering decision──▶ BUFFERING ──healthy decision──▶ NORMAL (flush)
//!      │                               │
//!      └──────────── halt() ───────────┴──▶ HALTED ──resume()──▶ NORMAL (flush)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use super::decision::{decide_at, Decision, SystemState, HEALTH_WINDOW};
use super::monitor::HealthMonitor;
use super::synth::synthesize;
use crate::config::{
    Config, DEFAULT_CONTENT_CAP, DEFAULT_PENDING_WARNING, DEFAULT_THRESHOLD_MS,
    DEFAULT_WINDOW_CAPACITY,
};
use crate::store::{
    normalize_agent, BufferedThought, JsonFileBackend, MemoryBackend, Priority, StoreLimits,
    ThoughtStore,
};
use crate::{hlog, hlog_audit, hlog_debug, hlog_error, hlog_trace, hlog_warn, Error, Result};

/// Engine tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct GovernanceConfig {
    pub threshold_ms: f64,
    pub window_capacity: usize,
    pub health_window: Duration,
    pub content_cap: usize,
    /// Pending count per agent at which buffering starts warning. 0 disables.
    pub pending_warning: usize,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            threshold_ms: DEFAULT_THRESHOLD_MS,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            health_window: HEALTH_WINDOW,
            content_cap: DEFAULT_CONTENT_CAP,
            pending_warning: DEFAULT_PENDING_WARNING,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GovernanceMode {
    #[default]
    Normal,
    Buffering,
    Halted,
}

impl fmt::Display for GovernanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GovernanceMode::Normal => write!(f, "NORMAL"),
            GovernanceMode::Buffering => write!(f, "BUFFERING"),
            GovernanceMode::Halted => write!(f, "HALTED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeTransition {
    pub from: GovernanceMode,
    pub to: GovernanceMode,
}

impl ModeTransition {
    /// Leaving BUFFERING or HALTED for NORMAL.
    pub fn is_recovery(&self) -> bool {
        self.to == GovernanceMode::Normal && self.from != GovernanceMode::Normal
    }
}

/// Events emitted for observers such as a transport or status display.
#[derive(Debug, Clone, PartialEq)]
pub enum GovernanceEvent {
    ModeChanged {
        from: GovernanceMode,
        to: GovernanceMode,
        reason: String,
    },
    Buffered {
        agent_id: String,
        id: u64,
    },
    Synthesized(AgentSynthesis),
    Purged {
        agent_id: Option<String>,
        count: usize,
    },
    Halted,
    Resumed,
}

/// Result of feeding one latency sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyRecord {
    pub recorded: bool,
    pub average: f64,
}

/// Snapshot for status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceStatus {
    pub mode: GovernanceMode,
    pub buffering: bool,
    pub halted: bool,
    pub forced_buffering: bool,
    pub simulated_latency_ms: f64,
    pub reason: String,
    pub pending: usize,
    pub agents: Vec<String>,
    pub avg_latency: f64,
    pub max_latency: f64,
    pub threshold: f64,
    pub store_available: bool,
}

/// Outcome of buffering one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BufferOutcome {
    Buffered {
        id: u64,
        pending: usize,
        warning: Option<String>,
    },
    /// Input could not be buffered (blank content).
    Rejected { reason: String },
    /// The store is unavailable; buffering is effectively disabled.
    Degraded { reason: String },
}

impl BufferOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, BufferOutcome::Buffered { .. })
    }

    pub fn id(&self) -> Option<u64> {
        match self {
            BufferOutcome::Buffered { id, .. } => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for BufferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferOutcome::Buffered {
                id,
                pending,
                warning,
            } => {
                write!(f, "buffered #{} ({} pending)", id, pending)?;
                if let Some(w) = warning {
                    write!(f, " warning: {}", w)?;
                }
                Ok(())
            }
            BufferOutcome::Rejected { reason } => write!(f, "rejected: {}", reason),
            BufferOutcome::Degraded { reason } => write!(f, "buffering unavailable: {}", reason),
        }
    }
}

/// Where a send attempt went.
#[derive(Debug, Clone, PartialEq)]
pub enum SendRoute {
    /// Send directly. `recovered` holds backlog syntheses flushed on the way,
    /// which the transport should deliver first.
    PassThrough {
        decision: Decision,
        recovered: Vec<AgentSynthesis>,
    },
    /// Held back; the caller reports success to the agent.
    Buffered {
        decision: Decision,
        outcome: BufferOutcome,
    },
}

impl SendRoute {
    pub fn is_buffered(&self) -> bool {
        matches!(self, SendRoute::Buffered { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushTarget {
    Agent(String),
    All,
}

impl From<&str> for FlushTarget {
    fn from(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            FlushTarget::All
        } else {
            FlushTarget::Agent(s.to_string())
        }
    }
}

/// One agent's coalesced backlog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSynthesis {
    pub agent_id: String,
    pub thought_count: usize,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FlushOutcome {
    Synthesized { syntheses: Vec<AgentSynthesis> },
    NothingPending,
    Degraded { reason: String },
}

impl FlushOutcome {
    pub fn syntheses(&self) -> &[AgentSynthesis] {
        match self {
            FlushOutcome::Synthesized { syntheses } => syntheses,
            _ => &[],
        }
    }
}

impl fmt::Display for FlushOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushOutcome::Synthesized { syntheses } => {
                for (i, s) in syntheses.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    writeln!(f, "== {} ({} thoughts) ==", s.agent_id, s.thought_count)?;
                    write!(f, "{}", s.output)?;
                }
                Ok(())
            }
            FlushOutcome::NothingPending => write!(f, "no pending thoughts"),
            FlushOutcome::Degraded { reason } => write!(f, "flush unavailable: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PurgeOutcome {
    Purged { count: usize },
    Degraded { reason: String },
}

impl fmt::Display for PurgeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurgeOutcome::Purged { count } => write!(f, "discarded {} pending thought(s)", count),
            PurgeOutcome::Degraded { reason } => write!(f, "purge unavailable: {}", reason),
        }
    }
}

/// Result of re-evaluating health.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    pub mode: GovernanceMode,
    pub transition: Option<ModeTransition>,
    /// Backlogs flushed because this evaluation found the link healthy.
    pub recovered: Vec<AgentSynthesis>,
}

pub struct GovernanceController {
    config: GovernanceConfig,
    monitor: HealthMonitor,
    store: ThoughtStore,
    state: RwLock<SystemState>,
    mode: Mutex<GovernanceMode>,
    event_tx: Option<mpsc::Sender<GovernanceEvent>>,
}

impl GovernanceController {
    pub fn new(config: GovernanceConfig, store: ThoughtStore) -> Self {
        Self {
            monitor: HealthMonitor::new(config.window_capacity),
            config,
            store,
            state: RwLock::new(SystemState::default()),
            mode: Mutex::new(GovernanceMode::Normal),
            event_tx: None,
        }
    }

    /// Build from file configuration. `ephemeral` keeps the queue in memory.
    pub async fn from_config(config: &Config, ephemeral: bool) -> Result<Self> {
        let gov = config.governance();
        let limits = StoreLimits {
            content_cap: gov.content_cap,
            write_timeout: config.store_timeout(),
        };
        let store = if ephemeral {
            ThoughtStore::open(Arc::new(MemoryBackend::new()), limits).await
        } else {
            let backend = JsonFileBackend::new(config.store_path()?);
            ThoughtStore::open(Arc::new(backend), limits).await
        };
        Ok(Self::new(gov, store))
    }

    pub fn with_events(mut self, event_tx: mpsc::Sender<GovernanceEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn store(&self) -> &ThoughtStore {
        &self.store
    }

    pub fn system_state(&self) -> SystemState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mode(&self) -> GovernanceMode {
        *self.lock_mode()
    }

    /// Record a latency sample without re-evaluating.
    pub fn record_latency(&self, latency_ms: f64) -> LatencyRecord {
        self.monitor.record(latency_ms);
        LatencyRecord {
            recorded: true,
            average: self.monitor.average(self.config.health_window, 0.0),
        }
    }

    /// Feed a latency observation from the transport and re-evaluate, so a
    /// recovery flushes as soon as the feed shows it.
    pub async fn report_latency(&self, latency_ms: f64) -> (LatencyRecord, Evaluation) {
        let record = self.record_latency(latency_ms);
        (record, self.evaluate().await)
    }

    /// Current decision. Does not change the mode.
    pub fn decide(&self) -> Decision {
        let state = self.system_state();
        decide_at(
            &self.monitor,
            self.config.threshold_ms,
            &state,
            self.config.health_window,
            Instant::now(),
        )
    }

    pub async fn status(&self) -> GovernanceStatus {
        let state = self.system_state();
        let decision = self.decide();
        let window = self.config.health_window;
        GovernanceStatus {
            mode: self.mode(),
            buffering: decision.buffering,
            halted: state.halted,
            forced_buffering: state.forced_buffering,
            simulated_latency_ms: state.simulated_latency_ms,
            reason: decision.reason.to_string(),
            pending: self.store.pending_count(None).await,
            agents: self.store.agents_with_pending().await.into_iter().collect(),
            avg_latency: self.monitor.average(window, state.simulated_latency_ms),
            max_latency: self.monitor.max(window, state.simulated_latency_ms),
            threshold: self.config.threshold_ms,
            store_available: self.store.is_available(),
        }
    }

    /// Re-evaluate health, update the mode, and flush every backlog while
    /// the link is healthy.
    ///
    /// Draining is not tied to the transition into NORMAL: thoughts reloaded
    /// after a restart, or left behind by a failed flush, go out on the next
    /// healthy evaluation.
    pub async fn evaluate(&self) -> Evaluation {
        let (decision, mode, transition) = self.observe();
        let recovered = if decision.buffering {
            Vec::new()
        } else {
            match transition {
                Some(t) if t.is_recovery() => {
                    hlog!("Recovered ({} -> {}), flushing backlog", t.from, t.to)
                }
                _ => hlog_trace!("Healthy evaluation, draining any leftover backlog"),
            }
            self.flush_inner(FlushTarget::All, true)
                .await
                .syntheses()
                .to_vec()
        };
        Evaluation {
            decision,
            mode,
            transition,
            recovered,
        }
    }

    /// Route one outbound message: buffer it, or tell the caller to send.
    pub async fn send_attempt(
        &self,
        agent_id: &str,
        channel: &str,
        target: &str,
        content: &str,
        priority: Option<&str>,
    ) -> SendRoute {
        let evaluation = self.evaluate().await;
        let decision = evaluation.decision;
        if decision.buffering {
            hlog_debug!("send_attempt agent={} buffered: {}", agent_id, decision.reason);
            let outcome = self
                .buffer_attempt(agent_id, channel, target, content, priority)
                .await;
            SendRoute::Buffered { decision, outcome }
        } else {
            hlog_debug!("send_attempt agent={} passes through", agent_id);
            SendRoute::PassThrough {
                decision,
                recovered: evaluation.recovered,
            }
        }
    }

    /// Buffer a message unconditionally.
    pub async fn buffer_attempt(
        &self,
        agent_id: &str,
        channel: &str,
        target: &str,
        content: &str,
        priority: Option<&str>,
    ) -> BufferOutcome {
        let agent_id = normalize_agent(agent_id);
        let priority = Priority::normalize(priority);
        match self
            .store
            .insert(&agent_id, channel, target, content, priority)
            .await
        {
            Ok(id) => {
                let pending = self.store.pending_count(Some(&agent_id)).await;
                let cap = self.config.pending_warning;
                let warning = (cap > 0 && pending >= cap).then(|| {
                    hlog_warn!("Agent {} has {} pending thoughts", agent_id, pending);
                    format!(
                        "{} pending thoughts for this agent (capacity {}); consider flushing",
                        pending, cap
                    )
                });
                self.emit(GovernanceEvent::Buffered { agent_id, id });
                BufferOutcome::Buffered {
                    id,
                    pending,
                    warning,
                }
            }
            Err(Error::Validation(reason)) => BufferOutcome::Rejected { reason },
            Err(e) => BufferOutcome::Degraded {
                reason: e.to_string(),
            },
        }
    }

    /// Synthesize and consume the backlog of one agent or of all agents.
    pub async fn flush(&self, target: FlushTarget) -> FlushOutcome {
        self.flush_inner(target, false).await
    }

    /// With `only_when_healthy`, each agent's batch is left pending if the
    /// decision has turned to buffering by the time the store lock is held,
    /// so a halt or override that lands mid-drain stops the rest of it.
    async fn flush_inner(&self, target: FlushTarget, only_when_healthy: bool) -> FlushOutcome {
        if let Some(reason) = self.store.unavailable_reason() {
            return FlushOutcome::Degraded {
                reason: reason.to_string(),
            };
        }

        let agents: Vec<String> = match target {
            FlushTarget::Agent(agent) => vec![agent],
            FlushTarget::All => self.store.agents_with_pending().await.into_iter().collect(),
        };

        let mut syntheses = Vec::new();
        let mut failure = None;
        for agent in agents {
            let render = |batch: &[BufferedThought]| {
                if only_when_healthy && self.decide().buffering {
                    None
                } else {
                    Some(synthesize(batch))
                }
            };
            match self.store.consume_pending(&agent, render).await {
                Ok(Some(event)) => {
                    hlog_audit!(
                        "synthesize",
                        "agent={} count={}",
                        event.agent_id,
                        event.thought_count
                    );
                    let synthesis = AgentSynthesis {
                        agent_id: event.agent_id,
                        thought_count: event.thought_count,
                        output: event.final_output,
                    };
                    self.emit(GovernanceEvent::Synthesized(synthesis.clone()));
                    syntheses.push(synthesis);
                }
                Ok(None) => {}
                Err(e) => {
                    hlog_error!("Flush for agent {} failed: {}", agent, e);
                    failure = Some(e.to_string());
                }
            }
        }

        match (syntheses.is_empty(), failure) {
            (false, _) => FlushOutcome::Synthesized { syntheses },
            (true, Some(reason)) => FlushOutcome::Degraded { reason },
            (true, None) => FlushOutcome::NothingPending,
        }
    }

    /// Discard pending thoughts without synthesis.
    pub async fn purge(&self, agent_id: Option<&str>) -> PurgeOutcome {
        match self.store.purge(agent_id).await {
            Ok(count) => {
                hlog_audit!("purge", "agent={} count={}", agent_id.unwrap_or("all"), count);
                self.emit(GovernanceEvent::Purged {
                    agent_id: agent_id.map(str::to_string),
                    count,
                });
                PurgeOutcome::Purged { count }
            }
            Err(e) => PurgeOutcome::Degraded {
                reason: e.to_string(),
            },
        }
    }

    pub async fn set_forced_buffering(&self, forced: bool) -> Evaluation {
        hlog_audit!("force_buffering", "enabled={}", forced);
        self.update_state(|s| s.with_forced_buffering(forced));
        self.evaluate().await
    }

    pub async fn set_simulated_latency(&self, latency_ms: f64) -> Evaluation {
        hlog_audit!("simulate_latency", "ms={}", latency_ms);
        self.update_state(|s| s.with_simulated_latency(latency_ms));
        self.evaluate().await
    }

    /// Clear forced buffering and simulated latency. Does not lift a halt.
    pub async fn off(&self) -> Evaluation {
        hlog_audit!("off");
        self.update_state(|s| s.with_forced_buffering(false).with_simulated_latency(0.0));
        self.evaluate().await
    }

    /// Kill switch. Takes effect before this call returns.
    pub fn halt(&self) {
        let mut mode = self.lock_mode();
        let already = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let already = state.halted;
            *state = state.with_halted(true);
            already
        };

        hlog_audit!("halt", "already_halted={}", already);
        if already {
            return;
        }

        hlog_warn!("HALT engaged: all outbound messages will be buffered");
        let from = std::mem::replace(&mut *mode, GovernanceMode::Halted);
        drop(mode);
        self.emit(GovernanceEvent::Halted);
        if from != GovernanceMode::Halted {
            self.emit(GovernanceEvent::ModeChanged {
                from,
                to: GovernanceMode::Halted,
                reason: "halted".to_string(),
            });
        }
    }

    /// Lift a halt and clear every override, then re-evaluate.
    pub async fn resume(&self) -> Evaluation {
        let was_halted = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let was = state.halted;
            *state = SystemState::default();
            was
        };
        hlog_audit!("resume", "was_halted={}", was_halted);
        if was_halted {
            self.emit(GovernanceEvent::Resumed);
        }
        self.evaluate().await
    }

    fn update_state<F>(&self, change: F)
    where
        F: FnOnce(SystemState) -> SystemState,
    {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = change(*state);
    }

    /// Decide and move the mode under one lock so evaluations never apply
    /// out of order.
    fn observe(&self) -> (Decision, GovernanceMode, Option<ModeTransition>) {
        let mut mode = self.lock_mode();
        let state = self.system_state();
        let decision = decide_at(
            &self.monitor,
            self.config.threshold_ms,
            &state,
            self.config.health_window,
            Instant::now(),
        );

        let next = if state.halted {
            GovernanceMode::Halted
        } else if decision.buffering {
            GovernanceMode::Buffering
        } else {
            GovernanceMode::Normal
        };

        let from = std::mem::replace(&mut *mode, next);
        drop(mode);
        if from == next {
            return (decision, next, None);
        }

        hlog!("Mode {} -> {} ({})", from, next, decision.reason);
        self.emit(GovernanceEvent::ModeChanged {
            from,
            to: next,
            reason: decision.reason.to_string(),
        });
        (decision, next, Some(ModeTransition { from, to: next }))
    }

    fn lock_mode(&self) -> MutexGuard<'_, GovernanceMode> {
        self.mode.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: GovernanceEvent) {
        let Some(tx) = &self.event_tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                hlog_warn!("Governance event channel full, dropping {:?}", event);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                hlog_debug!("Governance event channel closed");
            }
        }
    }
}
