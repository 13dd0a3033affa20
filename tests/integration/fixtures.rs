//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Controllers over in-memory or on-disk stores
//! - Backends that fail or stall on purpose

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

use hush::governance::{GovernanceConfig, GovernanceController, GovernanceEvent};
use hush::store::{JsonFileBackend, Ledger, StoreLimits, ThoughtBackend, ThoughtStore};
use hush::{Error, Result};

/// Controller with default tunables over an in-memory store.
pub async fn memory_controller() -> GovernanceController {
    GovernanceController::new(GovernanceConfig::default(), ThoughtStore::in_memory().await)
}

/// Controller wired to an event channel.
pub async fn controller_with_events() -> (GovernanceController, mpsc::Receiver<GovernanceEvent>) {
    let (tx, rx) = mpsc::channel(256);
    (memory_controller().await.with_events(tx), rx)
}

/// Drain whatever events are queued right now.
pub fn drain(rx: &mut mpsc::Receiver<GovernanceEvent>) -> Vec<GovernanceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// A temporary directory holding a JSON ledger.
pub struct TestStoreDir {
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl TestStoreDir {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("thoughts.json");
        Self { temp_dir, path }
    }

    pub async fn open(&self) -> ThoughtStore {
        ThoughtStore::open(
            Arc::new(JsonFileBackend::new(&self.path)),
            StoreLimits::default(),
        )
        .await
    }
}

/// Backend whose saves block well past any sane timeout.
pub struct StallingBackend {
    pub stall: Duration,
}

impl ThoughtBackend for StallingBackend {
    fn load(&self) -> Result<Ledger> {
        Ok(Ledger::new())
    }

    fn save(&self, _ledger: &Ledger) -> Result<()> {
        std::thread::sleep(self.stall);
        Ok(())
    }

    fn describe(&self) -> String {
        "stalling".to_string()
    }
}

/// Backend that cannot even be loaded.
pub struct UnreachableBackend;

impl ThoughtBackend for UnreachableBackend {
    fn load(&self) -> Result<Ledger> {
        Err(Error::StoreUnavailable("connection refused".to_string()))
    }

    fn save(&self, _ledger: &Ledger) -> Result<()> {
        Err(Error::StoreUnavailable("connection refused".to_string()))
    }

    fn describe(&self) -> String {
        "unreachable".to_string()
    }
}
