//! Concurrency: inserts racing synthesis, many senders, operator flips.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;

use hush::governance::{FlushTarget, GovernanceMode, SendRoute};
use hush::store::{Priority, ThoughtStatus, ThoughtStore};

use crate::fixtures::memory_controller;

/// Given inserts racing repeated syntheses for the same agent
/// When everything settles
/// Then every thought was synthesized exactly once or is still pending
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_inserts_never_lost_or_double_counted() {
    let store = Arc::new(ThoughtStore::in_memory().await);

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let mut ids = Vec::new();
                for i in 0..25 {
                    let id = store
                        .insert("main", "chat", "u", &format!("w{w}-{i}"), Priority::P1)
                        .await
                        .unwrap();
                    ids.push(id);
                    tokio::task::yield_now().await;
                }
                ids
            })
        })
        .collect();

    let synth_store = Arc::clone(&store);
    let synthesizer = tokio::spawn(async move {
        let mut events = Vec::new();
        for _ in 0..30 {
            if let Some(event) = synth_store.mark_synthesized("main", "batch").await.unwrap() {
                events.push(event);
            }
            tokio::task::yield_now().await;
        }
        events
    });

    let mut inserted = HashSet::new();
    for ids in join_all(writers).await {
        inserted.extend(ids.unwrap());
    }
    let events = synthesizer.await.unwrap();

    let mut consumed = HashSet::new();
    for event in &events {
        assert_eq!(event.thought_count, event.thought_ids.len());
        assert!(event.thought_count > 0);
        for id in &event.thought_ids {
            assert!(consumed.insert(*id), "thought {id} synthesized twice");
        }
    }

    let pending: HashSet<u64> = store.pending("main").await.iter().map(|t| t.id).collect();
    assert!(consumed.is_disjoint(&pending));
    let accounted: HashSet<u64> = consumed.union(&pending).copied().collect();
    assert_eq!(accounted, inserted);
    assert_eq!(inserted.len(), 100);

    for id in consumed {
        assert_eq!(store.get(id).await.unwrap().status, ThoughtStatus::Synthesized);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pending_order_holds_under_interleaving() {
    let store = Arc::new(ThoughtStore::in_memory().await);
    let tasks: Vec<_> = (0..60)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let priority = match i % 3 {
                    0 => Priority::P2,
                    1 => Priority::P0,
                    _ => Priority::P1,
                };
                store
                    .insert("main", "chat", "u", &format!("m{i}"), priority)
                    .await
                    .unwrap()
            })
        })
        .collect();
    join_all(tasks).await;

    let pending = store.pending("main").await;
    assert_eq!(pending.len(), 60);
    for pair in pending.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(a.priority <= b.priority);
        if a.priority == b.priority {
            assert!(a.id < b.id);
            assert!(a.created_at <= b.created_at);
        }
    }
}

/// Given many agents sending while an operator halts mid-stream
/// When the halt has returned
/// Then no later send passes through
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_halt_takes_effect_for_all_later_sends() {
    let ctl = Arc::new(memory_controller().await);

    let before: Vec<_> = (0..10)
        .map(|i| {
            let ctl = Arc::clone(&ctl);
            tokio::spawn(async move {
                ctl.send_attempt(&format!("agent-{i}"), "chat", "u", "early", None)
                    .await
            })
        })
        .collect();

    ctl.halt();

    let after: Vec<_> = (0..20)
        .map(|i| {
            let ctl = Arc::clone(&ctl);
            tokio::spawn(async move {
                if i % 2 == 0 {
                    ctl.set_forced_buffering(false).await;
                }
                ctl.send_attempt(&format!("agent-{i}"), "chat", "u", "late", Some("P0"))
                    .await
            })
        })
        .collect();

    // Early sends may land on either side of the halt.
    let early_buffered = join_all(before)
        .await
        .into_iter()
        .filter(|route| route.as_ref().unwrap().is_buffered())
        .count();
    for route in join_all(after).await {
        assert!(matches!(route.unwrap(), SendRoute::Buffered { .. }));
    }
    assert_eq!(ctl.mode(), GovernanceMode::Halted);
    assert_eq!(
        ctl.store().pending_count(None).await,
        20 + early_buffered
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_flushes_consume_each_backlog_once() {
    let ctl = Arc::new(memory_controller().await);
    for agent in ["a", "b", "c"] {
        for i in 0..5 {
            ctl.buffer_attempt(agent, "chat", "u", &format!("{agent}{i}"), None)
                .await;
        }
    }

    let flushes: Vec<_> = (0..6)
        .map(|_| {
            let ctl = Arc::clone(&ctl);
            tokio::spawn(async move { ctl.flush(FlushTarget::All).await })
        })
        .collect();

    let mut total = 0;
    for outcome in join_all(flushes).await {
        total += outcome
            .unwrap()
            .syntheses()
            .iter()
            .map(|s| s.thought_count)
            .sum::<usize>();
    }
    assert_eq!(total, 15);
    assert_eq!(ctl.store().synthesis_history(None).await.len(), 3);
}
