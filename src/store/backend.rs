//! Persistence backends for the thought ledger.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::thoughts::{BufferedThought, SynthesisEvent};
use crate::{hlog_debug, Error, Result};

pub const LEDGER_VERSION: u32 = 1;

/// Everything the store must keep across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub version: u32,
    /// Next id to hand out. Ids start at 1 and never repeat.
    pub next_id: u64,
    /// Thoughts in creation (id) order.
    pub thoughts: Vec<BufferedThought>,
    /// Synthesis audit log, append-only.
    pub events: Vec<SynthesisEvent>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            version: LEDGER_VERSION,
            next_id: 1,
            thoughts: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Restore invariants a hand-edited or older file may violate.
    pub fn repair(mut self) -> Self {
        self.thoughts.sort_by_key(|t| t.id);
        let max_id = self.thoughts.last().map(|t| t.id).unwrap_or(0);
        if self.next_id <= max_id {
            self.next_id = max_id + 1;
        }
        self.next_id = self.next_id.max(1);
        self
    }
}

/// Durable storage for a [`Ledger`].
///
/// Implementations are called from blocking threads and may block.
pub trait ThoughtBackend: Send + Sync + 'static {
    fn load(&self) -> Result<Ledger>;
    fn save(&self, ledger: &Ledger) -> Result<()>;
    fn describe(&self) -> String;
}

/// Ledger kept as a JSON file, replaced atomically on every save.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ThoughtBackend for JsonFileBackend {
    fn load(&self) -> Result<Ledger> {
        hlog_debug!("JsonFileBackend::load path={}", self.path.display());
        if !self.path.exists() {
            hlog_debug!("Ledger file not found, starting empty");
            return Ok(Ledger::new());
        }

        let contents = fs::read_to_string(&self.path)?;
        let ledger: Ledger = serde_json::from_str(&contents)?;
        if ledger.version > LEDGER_VERSION {
            return Err(Error::StoreUnavailable(format!(
                "ledger version {} is newer than supported {}",
                ledger.version, LEDGER_VERSION
            )));
        }
        hlog_debug!(
            "Ledger loaded: {} thoughts, {} events",
            ledger.thoughts.len(),
            ledger.events.len()
        );
        Ok(ledger.repair())
    }

    fn save(&self, ledger: &Ledger) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                hlog_debug!("Creating store directory: {}", dir.display());
                fs::create_dir_all(dir)?;
            }
        }

        if self.path.exists() {
            let backup_path = self.path.with_extension("json.bak");
            fs::copy(&self.path, &backup_path)?;
        }

        let contents = serde_json::to_string_pretty(ledger)?;
        // One temp file per process.
        let temp_path = self
            .path
            .with_extension(format!("json.{}.tmp", std::process::id()));
        fs::write(&temp_path, &contents)?;
        fs::rename(&temp_path, &self.path)?;
        hlog_debug!("Ledger saved: {}", self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

/// In-process backend for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryBackend {
    ledger: Mutex<Ledger>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ledger(ledger: Ledger) -> Self {
        Self {
            ledger: Mutex::new(ledger),
        }
    }

    /// Last ledger handed to `save`.
    pub fn saved(&self) -> Ledger {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ThoughtBackend for MemoryBackend {
    fn load(&self) -> Result<Ledger> {
        Ok(self.saved().repair())
    }

    fn save(&self, ledger: &Ledger) -> Result<()> {
        *self.ledger.lock().unwrap_or_else(|e| e.into_inner()) = ledger.clone();
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
