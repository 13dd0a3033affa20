//! Durable, priority-ordered thought queue.
//!
//! Every mutation runs as a transaction under one async mutex: the ledger is
//! copied, changed, persisted through the backend with a bounded timeout, and
//! only then made visible. A failed or stalled write leaves the queue exactly
//! as it was.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::backend::{Ledger, MemoryBackend, ThoughtBackend};
use crate::config::{DEFAULT_CONTENT_CAP, DEFAULT_STORE_TIMEOUT_MS};
use crate::util::{blocking_with_timeout, truncate_chars};
use crate::{hlog, hlog_debug, hlog_error, hlog_warn, Error, Result};

/// Agent id used when a caller supplies a blank one.
pub const DEFAULT_AGENT: &str = "main";

/// Priority tier of a buffered thought. Orders P0 < P1 < P2.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    /// Critical, preserve through synthesis.
    P0,
    #[default]
    P1,
    /// Low, safe to discard.
    P2,
}

impl Priority {
    /// Normalize untrusted input. Anything unrecognised becomes P1.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("p0") | Some("0") | Some("critical") => Priority::P0,
            Some("p2") | Some("2") | Some("low") => Priority::P2,
            _ => Priority::P1,
        }
    }

    /// Tag shown in synthesized output; P1 is untagged.
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            Priority::P0 => Some("[CRITICAL]"),
            Priority::P1 => None,
            Priority::P2 => Some("[low]"),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::P0 => write!(f, "P0"),
            Priority::P1 => write!(f, "P1"),
            Priority::P2 => write!(f, "P2"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtStatus {
    #[default]
    Pending,
    Synthesized,
    Discarded,
}

impl fmt::Display for ThoughtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThoughtStatus::Pending => write!(f, "pending"),
            ThoughtStatus::Synthesized => write!(f, "synthesized"),
            ThoughtStatus::Discarded => write!(f, "discarded"),
        }
    }
}

/// A buffered outbound message. Content never changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedThought {
    pub id: u64,
    pub agent_id: String,
    pub channel: String,
    pub target: String,
    pub content: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub status: ThoughtStatus,
}

impl BufferedThought {
    /// Queue order: priority, then creation time, then id.
    pub fn queue_order(a: &Self, b: &Self) -> Ordering {
        a.priority
            .cmp(&b.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    }

    pub fn is_pending(&self) -> bool {
        self.status == ThoughtStatus::Pending
    }
}

/// Audit record for one synthesis batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisEvent {
    pub agent_id: String,
    pub thought_count: usize,
    #[serde(default)]
    pub thought_ids: Vec<u64>,
    pub final_output: String,
    pub triggered_at: DateTime<Utc>,
}

/// Limits applied by the store.
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    /// Max characters kept per thought; longer content is truncated.
    pub content_cap: usize,
    /// Bound on a single backend load or save.
    pub write_timeout: Duration,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            content_cap: DEFAULT_CONTENT_CAP,
            write_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
        }
    }
}

enum Txn<T> {
    Commit(T),
    Skip(T),
}

/// Trimmed agent id, with a blank id mapped to [`DEFAULT_AGENT`].
pub fn normalize_agent(agent_id: &str) -> String {
    let trimmed = agent_id.trim();
    if trimmed.is_empty() {
        DEFAULT_AGENT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Durable per-agent queue of buffered thoughts.
pub struct ThoughtStore {
    backend: Arc<dyn ThoughtBackend>,
    ledger: Mutex<Ledger>,
    limits: StoreLimits,
    unavailable: Option<String>,
    /// Held by a save until the backend returns, even after the caller
    /// stopped waiting on it.
    write_gate: Arc<Mutex<()>>,
    /// Set when a save failed or timed out, so the backend may hold a
    /// ledger that was never committed here.
    resync: AtomicBool,
}

impl ThoughtStore {
    /// Open a store over `backend`.
    ///
    /// Never fails: when the backend cannot be loaded the store comes up
    /// unavailable, serving empty reads and rejecting writes.
    pub async fn open(backend: Arc<dyn ThoughtBackend>, limits: StoreLimits) -> Self {
        let loader = Arc::clone(&backend);
        let loaded = blocking_with_timeout(limits.write_timeout, move || loader.load()).await;
        let (ledger, unavailable) = match loaded {
            Ok(ledger) => {
                hlog!(
                    "ThoughtStore opened {} ({} thoughts)",
                    backend.describe(),
                    ledger.thoughts.len()
                );
                (ledger, None)
            }
            Err(e) => {
                hlog_error!(
                    "ThoughtStore unavailable, buffering disabled: {} ({})",
                    e,
                    backend.describe()
                );
                (Ledger::new(), Some(e.to_string()))
            }
        };

        Self {
            backend,
            ledger: Mutex::new(ledger),
            limits,
            unavailable,
            write_gate: Arc::new(Mutex::new(())),
            resync: AtomicBool::new(false),
        }
    }

    /// Store backed only by process memory.
    pub async fn in_memory() -> Self {
        Self::open(Arc::new(MemoryBackend::new()), StoreLimits::default()).await
    }

    pub fn is_available(&self) -> bool {
        self.unavailable.is_none()
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        self.unavailable.as_deref()
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Buffer a thought and return its id.
    ///
    /// # Errors
    /// `Validation` when content is blank after trimming, `StoreUnavailable`
    /// or `Timeout` when the write could not be persisted.
    pub async fn insert(
        &self,
        agent_id: &str,
        channel: &str,
        target: &str,
        content: &str,
        priority: Priority,
    ) -> Result<u64> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation("content is empty".to_string()));
        }
        let content = truncate_chars(trimmed, self.limits.content_cap);
        if content.len() < trimmed.len() {
            hlog_warn!(
                "Thought content truncated to {} characters",
                self.limits.content_cap
            );
        }
        let agent_id = normalize_agent(agent_id);

        let id = self
            .transact(|ledger| {
                let id = ledger.next_id;
                ledger.next_id += 1;
                // Keep created_at monotonic with id even if the wall clock steps back.
                let now = Utc::now();
                let created_at = ledger
                    .thoughts
                    .last()
                    .map_or(now, |last| last.created_at.max(now));
                ledger.thoughts.push(BufferedThought {
                    id,
                    agent_id: agent_id.clone(),
                    channel: channel.to_string(),
                    target: target.to_string(),
                    content: content.to_string(),
                    priority,
                    created_at,
                    status: ThoughtStatus::Pending,
                });
                Ok(Txn::Commit(id))
            })
            .await?;

        hlog_debug!("ThoughtStore::insert id={} agent={} priority={}", id, agent_id, priority);
        Ok(id)
    }

    /// Pending thoughts for an agent in queue order.
    pub async fn pending(&self, agent_id: &str) -> Vec<BufferedThought> {
        let agent_id = normalize_agent(agent_id);
        let ledger = self.ledger.lock().await;
        pending_for(&ledger, &agent_id)
    }

    /// Pending count for one agent, or across all agents.
    pub async fn pending_count(&self, agent_id: Option<&str>) -> usize {
        let agent_id = agent_id.map(normalize_agent);
        let ledger = self.ledger.lock().await;
        ledger
            .thoughts
            .iter()
            .filter(|t| t.is_pending())
            .filter(|t| agent_id.as_deref().map_or(true, |a| t.agent_id == a))
            .count()
    }

    pub async fn agents_with_pending(&self) -> BTreeSet<String> {
        let ledger = self.ledger.lock().await;
        ledger
            .thoughts
            .iter()
            .filter(|t| t.is_pending())
            .map(|t| t.agent_id.clone())
            .collect()
    }

    pub async fn get(&self, id: u64) -> Option<BufferedThought> {
        let ledger = self.ledger.lock().await;
        ledger.thoughts.iter().find(|t| t.id == id).cloned()
    }

    /// Mark every currently pending thought of `agent_id` as synthesized into
    /// `output`. No-op returning `None` when nothing is pending.
    pub async fn mark_synthesized(
        &self,
        agent_id: &str,
        output: &str,
    ) -> Result<Option<SynthesisEvent>> {
        self.consume_pending(agent_id, |_| Some(output.to_string()))
            .await
    }

    /// Snapshot the pending set, render it, and transition exactly that
    /// snapshot to synthesized, as one transaction.
    ///
    /// Inserts for the same agent queue behind this call and land in the
    /// next cycle. A `render` returning `None` leaves the batch pending.
    pub async fn consume_pending<F>(
        &self,
        agent_id: &str,
        render: F,
    ) -> Result<Option<SynthesisEvent>>
    where
        F: FnOnce(&[BufferedThought]) -> Option<String>,
    {
        let agent_id = normalize_agent(agent_id);
        let event = self
            .transact(|ledger| {
                let batch = pending_for(ledger, &agent_id);
                if batch.is_empty() {
                    return Ok(Txn::Skip(None));
                }

                let Some(final_output) = render(&batch) else {
                    return Ok(Txn::Skip(None));
                };
                let ids: HashSet<u64> = batch.iter().map(|t| t.id).collect();
                for thought in ledger.thoughts.iter_mut() {
                    if ids.contains(&thought.id)
                        && thought.agent_id == agent_id
                        && thought.is_pending()
                    {
                        thought.status = ThoughtStatus::Synthesized;
                    }
                }

                let event = SynthesisEvent {
                    agent_id: agent_id.clone(),
                    thought_count: batch.len(),
                    thought_ids: batch.iter().map(|t| t.id).collect(),
                    final_output,
                    triggered_at: Utc::now(),
                };
                ledger.events.push(event.clone());
                Ok(Txn::Commit(Some(event)))
            })
            .await?;

        if let Some(event) = &event {
            hlog!(
                "Synthesized {} thought(s) for agent {}",
                event.thought_count,
                event.agent_id
            );
        }
        Ok(event)
    }

    /// Discard pending thoughts for one agent, or all agents, without synthesis.
    pub async fn purge(&self, agent_id: Option<&str>) -> Result<usize> {
        let agent_id = agent_id.map(normalize_agent);
        let count = self
            .transact(|ledger| {
                let mut count = 0;
                for thought in ledger.thoughts.iter_mut() {
                    if thought.is_pending()
                        && agent_id.as_deref().map_or(true, |a| thought.agent_id == a)
                    {
                        thought.status = ThoughtStatus::Discarded;
                        count += 1;
                    }
                }
                Ok(if count == 0 {
                    Txn::Skip(0)
                } else {
                    Txn::Commit(count)
                })
            })
            .await?;

        if count > 0 {
            hlog_warn!(
                "Purged {} pending thought(s) for {}",
                count,
                agent_id.as_deref().unwrap_or("all agents")
            );
        }
        Ok(count)
    }

    /// Synthesis audit log, oldest first.
    pub async fn synthesis_history(&self, agent_id: Option<&str>) -> Vec<SynthesisEvent> {
        let agent_id = agent_id.map(normalize_agent);
        let ledger = self.ledger.lock().await;
        ledger
            .events
            .iter()
            .filter(|e| agent_id.as_deref().map_or(true, |a| e.agent_id == a))
            .cloned()
            .collect()
    }

    /// Drop synthesized and discarded thoughts created before `cutoff`.
    /// Pending thoughts are never pruned.
    pub async fn prune_settled(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self
            .transact(|ledger| {
                let before = ledger.thoughts.len();
                ledger
                    .thoughts
                    .retain(|t| t.is_pending() || t.created_at >= cutoff);
                let removed = before - ledger.thoughts.len();
                Ok(if removed == 0 {
                    Txn::Skip(0)
                } else {
                    Txn::Commit(removed)
                })
            })
            .await?;
        if removed > 0 {
            hlog!("Pruned {} settled thought(s) older than {}", removed, cutoff);
        }
        Ok(removed)
    }

    async fn transact<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Ledger) -> Result<Txn<T>>,
    {
        let mut guard = self.ledger.lock().await;
        if let Some(reason) = &self.unavailable {
            return Err(Error::StoreUnavailable(reason.clone()));
        }

        // A timed-out save still owns the gate until the backend returns.
        // Refusing here keeps that late save from landing after a newer one.
        let gate = Arc::clone(&self.write_gate).try_lock_owned().map_err(|_| {
            hlog_warn!("ThoughtStore write refused: a timed-out save is still in flight");
            Error::StoreUnavailable("a timed-out save is still in flight".to_string())
        })?;

        let mut draft = guard.clone();
        let resync = self.resync.load(AtomicOrdering::Acquire);
        let value = match mutate(&mut draft)? {
            Txn::Skip(value) if !resync => return Ok(value),
            Txn::Skip(value) | Txn::Commit(value) => value,
        };
        if resync {
            hlog!("ThoughtStore rewriting committed ledger after a failed save");
        }

        let backend = Arc::clone(&self.backend);
        let persisted = blocking_with_timeout(self.limits.write_timeout, move || {
            let _gate = gate;
            backend.save(&draft)?;
            Ok(draft)
        })
        .await;

        match persisted {
            Ok(ledger) => {
                self.resync.store(false, AtomicOrdering::Release);
                *guard = ledger;
                Ok(value)
            }
            Err(e) => {
                self.resync.store(true, AtomicOrdering::Release);
                hlog_error!("ThoughtStore write failed ({}): {}", self.backend.describe(), e);
                Err(match e {
                    Error::Timeout(_) | Error::StoreUnavailable(_) => e,
                    other => Error::StoreUnavailable(other.to_string()),
                })
            }
        }
    }
}

fn pending_for(ledger: &Ledger, agent_id: &str) -> Vec<BufferedThought> {
    let mut pending: Vec<BufferedThought> = ledger
        .thoughts
        .iter()
        .filter(|t| t.is_pending() && t.agent_id == agent_id)
        .cloned()
        .collect();
    pending.sort_by(BufferedThought::queue_order);
    pending
}
