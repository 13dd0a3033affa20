//! Durability and degraded-store behaviour.

use std::sync::Arc;
use std::time::Duration;

use hush::governance::{
    BufferOutcome, FlushOutcome, FlushTarget, GovernanceConfig, GovernanceController,
    GovernanceMode, PurgeOutcome, SendRoute,
};
use hush::store::{Ledger, Priority, StoreLimits, ThoughtStatus, ThoughtStore};
use hush::Error;

use crate::fixtures::{StallingBackend, TestStoreDir, UnreachableBackend};

/// Given a store with pending and synthesized thoughts on disk
/// When the process restarts
/// Then the queue, statuses, audit log and id sequence survive
#[tokio::test]
async fn test_queue_survives_restart() {
    let dir = TestStoreDir::new();
    {
        let store = dir.open().await;
        store.insert("main", "chat", "u", "first", Priority::P1).await.unwrap();
        store.insert("other", "chat", "u", "second", Priority::P2).await.unwrap();
        store.mark_synthesized("other", "merged").await.unwrap();
        store.insert("main", "chat", "u", "third", Priority::P0).await.unwrap();
    }

    let store = dir.open().await;
    assert!(store.is_available());
    let pending: Vec<String> = store
        .pending("main")
        .await
        .into_iter()
        .map(|t| t.content)
        .collect();
    assert_eq!(pending, vec!["third".to_string(), "first".to_string()]);
    assert_eq!(store.pending_count(Some("other")).await, 0);
    assert_eq!(store.get(2).await.unwrap().status, ThoughtStatus::Synthesized);

    let history = store.synthesis_history(None).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].final_output, "merged");

    let next = store.insert("main", "chat", "u", "fourth", Priority::P1).await.unwrap();
    assert_eq!(next, 4);
}

/// Given a backlog persisted by an earlier process
/// When a fresh controller sees healthy latency
/// Then the backlog is flushed without any mode transition
#[tokio::test]
async fn test_reloaded_backlog_drains_when_healthy() {
    let dir = TestStoreDir::new();
    {
        let store = dir.open().await;
        store.insert("main", "chat", "u", "from last run", Priority::P0).await.unwrap();
    }

    let ctl = GovernanceController::new(GovernanceConfig::default(), dir.open().await);
    assert_eq!(ctl.mode(), GovernanceMode::Normal);
    let eval = ctl.evaluate().await;
    assert!(eval.transition.is_none());
    assert_eq!(eval.recovered.len(), 1);
    assert!(eval.recovered[0].output.contains("[CRITICAL]"));
    assert_eq!(ctl.store().pending_count(None).await, 0);

    let reopened = dir.open().await;
    assert_eq!(reopened.pending_count(None).await, 0);
    assert_eq!(reopened.synthesis_history(Some("main")).await.len(), 1);
}

#[tokio::test]
async fn test_ledger_file_is_plain_json() {
    let dir = TestStoreDir::new();
    let store = dir.open().await;
    store.insert("main", "chat", "u", "quote \" and 🚀", Priority::P0).await.unwrap();
    store.purge(Some("main")).await.unwrap();

    let raw = std::fs::read_to_string(&dir.path).unwrap();
    let ledger: Ledger = serde_json::from_str(&raw).unwrap();
    assert_eq!(ledger.thoughts.len(), 1);
    assert_eq!(ledger.thoughts[0].status, ThoughtStatus::Discarded);
    assert_eq!(ledger.thoughts[0].content, "quote \" and 🚀");
    assert!(raw.contains("\"discarded\""));
    assert!(raw.contains("\"P0\""));
}

#[tokio::test]
async fn test_corrupt_ledger_degrades_instead_of_crashing() {
    let dir = TestStoreDir::new();
    std::fs::write(&dir.path, "]]] not a ledger").unwrap();

    let store = dir.open().await;
    assert!(!store.is_available());
    assert!(store.pending("main").await.is_empty());
    let err = store
        .insert("main", "chat", "u", "hello", Priority::P1)
        .await
        .unwrap_err();
    assert!(err.is_store_failure());
    // The unreadable file is left for an operator to inspect.
    assert_eq!(
        std::fs::read_to_string(&dir.path).unwrap(),
        "]]] not a ledger"
    );
}

/// Given a backend whose writes hang
/// When a thought is inserted
/// Then the write gives up after the bound and nothing is committed
#[tokio::test]
async fn test_stalled_store_counts_as_unavailable() {
    let limits = StoreLimits {
        write_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let store = ThoughtStore::open(
        Arc::new(StallingBackend {
            stall: Duration::from_millis(400),
        }),
        limits,
    )
    .await;

    let started = std::time::Instant::now();
    let err = store
        .insert("main", "chat", "u", "stuck", Priority::P1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(started.elapsed() < Duration::from_millis(300));
    assert_eq!(store.pending_count(None).await, 0);

    let ctl = GovernanceController::new(GovernanceConfig::default(), store);
    let outcome = ctl.buffer_attempt("main", "chat", "u", "again", None).await;
    assert!(matches!(outcome, BufferOutcome::Degraded { .. }));
}

#[tokio::test]
async fn test_unreachable_store_disables_buffering() {
    let store = ThoughtStore::open(Arc::new(UnreachableBackend), StoreLimits::default()).await;
    let ctl = GovernanceController::new(GovernanceConfig::default(), store);

    let status = ctl.status().await;
    assert!(!status.store_available);
    assert_eq!(status.pending, 0);

    ctl.halt();
    match ctl.send_attempt("main", "chat", "u", "hello", None).await {
        SendRoute::Buffered { outcome, .. } => {
            assert!(matches!(outcome, BufferOutcome::Degraded { .. }), "{outcome}");
            assert!(outcome.to_string().contains("connection refused"));
        }
        other => panic!("halted controller must not pass through: {other:?}"),
    }

    assert!(matches!(
        ctl.flush(FlushTarget::All).await,
        FlushOutcome::Degraded { .. }
    ));
    assert!(matches!(
        ctl.purge(None).await,
        PurgeOutcome::Degraded { .. }
    ));
}
