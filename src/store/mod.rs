//! Durable storage for buffered thoughts and the synthesis audit log.
//!
//! `ThoughtStore` owns queue semantics (ordering, status transitions,
//! atomic synthesis); a `ThoughtBackend` only loads and saves the ledger.

mod backend;
mod thoughts;

pub use backend::{JsonFileBackend, Ledger, MemoryBackend, ThoughtBackend, LEDGER_VERSION};
pub use thoughts::{
    normalize_agent, BufferedThought, Priority, StoreLimits, SynthesisEvent, ThoughtStatus,
    ThoughtStore, DEFAULT_AGENT,
};
