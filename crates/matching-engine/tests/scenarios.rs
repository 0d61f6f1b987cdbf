//! End-to-end scenarios run against `EngineRouter`/`TaskListManager` as a
//! caller outside this crate would drive them: sync hand-off, a backlog
//! drain, cross-partition forwarding, an ownership conflict, a query
//! round-trip, and poll cancellation.

use std::sync::Arc;
use std::time::Duration;

use matching_engine::prelude::*;
use matching_store::InMemoryTaskStore;

fn config() -> MatchingConfig {
    let mut c = MatchingConfig::default();
    c.long_poll_expiration_interval = Duration::from_millis(500);
    c.ack_flush_interval = Duration::from_millis(20);
    c.idle_tasklist_check_interval = Duration::from_secs(600);
    c
}

fn new_task(schedule_id: i64) -> NewTask {
    NewTask {
        domain_id: "d1".to_string(),
        workflow_execution: WorkflowExecution {
            workflow_id: "wf".to_string(),
            run_id: "run".to_string(),
        },
        schedule_id,
        schedule_to_start_timeout_seconds: 30,
    }
}

/// Scenario: sync match fast path. A poller is already waiting when the
/// task lands; it should see the task with no forwarding provenance.
#[tokio::test]
async fn sync_match_fast_path() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let id = TaskListIdentity::root("d1", "tlSync", TaskListType::Activity);
    let manager = TaskListManager::start(id, TaskListKind::Normal, store, &config(), None)
        .await
        .unwrap();

    let poller = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.poll("w1".to_string(), None, None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.add_task(new_task(1)).await.into_result().unwrap();

    let polled = poller.await.unwrap().into_result().unwrap().expect("expected a match");
    assert!(polled.forwarded_from.is_none());
    match polled.item {
        MatchedItem::Task(t) => {
            assert_eq!(t.schedule_id, 1);
            manager.ack(t.task_id);
        }
        _ => panic!("expected a task"),
    }
}

/// Scenario: backlog drain. 500 tasks are added with no poller connected,
/// then a single poller drains them one at a time, in order, and the ack
/// watermark advances to cover every task once every task is acked.
#[tokio::test]
async fn backlog_drain_preserves_order_and_advances_ack_level() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let id = TaskListIdentity::root("d1", "tlB", TaskListType::Activity);
    let manager = TaskListManager::start(id, TaskListKind::Normal, store, &config(), None)
        .await
        .unwrap();

    for i in 1..=500 {
        manager.add_task(new_task(i)).await.into_result().unwrap();
    }
    // Give the background reader time to page everything into the matcher's
    // local buffer; nothing here depends on a poller being connected.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut seen_schedule_ids = Vec::with_capacity(500);
    let mut last_task_id = 0;
    for _ in 0..500 {
        let polled = manager
            .poll("drainer".to_string(), None, None)
            .await
            .into_result()
            .unwrap()
            .expect("backlog should not run dry before 500 tasks are drained");
        match polled.item {
            MatchedItem::Task(t) => {
                seen_schedule_ids.push(t.schedule_id);
                last_task_id = t.task_id;
                manager.ack(t.task_id);
            }
            _ => panic!("expected a task"),
        }
    }

    assert_eq!(seen_schedule_ids, (1..=500).collect::<Vec<_>>());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let describe = manager.describe();
    assert_eq!(describe.ack_level, last_task_id);
}

/// Scenario: forwarding. Tasks land on a leaf partition of a one-level
/// forwarding tree; a poller connected at the root should still receive
/// them, tagged with the child partition's wire name as their origin.
#[tokio::test]
async fn leaf_partition_tasks_forward_to_a_root_poller() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let router = EngineRouter::new(store, config());

    let root_id = TaskListIdentity::root("d1", "tlC", TaskListType::Activity);
    let leaf_id = root_id.child(3);

    let poller = {
        let router = router.clone();
        let root_id = root_id.clone();
        tokio::spawn(async move { router.poll(root_id, TaskListKind::Normal, "root-poller".to_string(), None).await })
    };
    // Let the root manager start and register its waiter before the leaf
    // task is added; otherwise the forward would race an empty parent.
    tokio::time::sleep(Duration::from_millis(30)).await;

    router
        .add_task(leaf_id.clone(), TaskListKind::Normal, new_task(99))
        .await
        .into_result()
        .unwrap();

    let polled = poller
        .await
        .unwrap()
        .into_result()
        .unwrap()
        .expect("root poller should receive the forwarded task");
    assert_eq!(polled.forwarded_from.as_deref(), Some(leaf_id.wire_name().as_str()));
    match polled.item {
        MatchedItem::Task(t) => assert_eq!(t.schedule_id, 99),
        _ => panic!("expected a task"),
    }
}

/// Scenario: ownership conflict. Starting a second manager on the same
/// task list bumps `RangeID` out from under the first; the first manager's
/// next add should observe a conflict and stop itself, while the second
/// manager keeps working normally.
#[tokio::test]
async fn second_manager_steals_ownership_and_first_stops() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let id = TaskListIdentity::root("d1", "tlD", TaskListType::Activity);

    let first = TaskListManager::start(id.clone(), TaskListKind::Normal, store.clone(), &config(), None)
        .await
        .unwrap();
    first.add_task(new_task(1)).await.into_result().unwrap();

    let second = TaskListManager::start(id, TaskListKind::Normal, store, &config(), None)
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(200), async {
        loop {
            let outcome = first.add_task(new_task(2)).await;
            if !outcome.is_ok() {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first manager should observe the conflict promptly");
    assert!(matches!(outcome, Outcome::Conflict { .. }));
    assert_eq!(first.state(), ManagerState::Stopped);

    second.add_task(new_task(3)).await.into_result().unwrap();
    assert_eq!(second.state(), ManagerState::Running);
}

/// Scenario: query round-trip. A query is delivered to a waiting poller
/// and the completion it posts is what the original caller receives.
#[tokio::test]
async fn query_round_trip_delivers_completion_to_caller() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let id = TaskListIdentity::root("d1", "tlE2", TaskListType::Decision);
    let manager = TaskListManager::start(id, TaskListKind::Normal, store, &config(), None)
        .await
        .unwrap();

    let poller = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.poll("worker-1".to_string(), None, None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let querier = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .query_workflow(
                    WorkflowExecution {
                        workflow_id: "wf".to_string(),
                        run_id: "run".to_string(),
                    },
                    QueryPayload {
                        query_type: "state".to_string(),
                        args: None,
                    },
                    Duration::from_millis(500),
                )
                .await
        })
    };

    let polled = poller.await.unwrap().into_result().unwrap().expect("expected the query task");
    let query_id = match polled.item {
        MatchedItem::Query(q) => q.query_id,
        _ => panic!("expected a query"),
    };

    manager
        .respond_query_completed(
            query_id,
            QueryCompletion {
                completion_type: QueryCompletionType::Completed,
                query_result: Some(serde_json::json!({"answer": 42})),
                error_message: None,
            },
        )
        .await
        .into_result()
        .unwrap();

    let completion = querier.await.unwrap().into_result().unwrap();
    assert_eq!(completion.query_result, Some(serde_json::json!({"answer": 42})));
}

/// Scenario: a failed query completion. `RespondQueryTaskCompleted` reports
/// `Failed` with `ErrorMessage = "nope"`; the original caller's
/// `QueryWorkflow` must come back as a non-retryable error carrying that
/// message, not a successful completion.
#[tokio::test]
async fn failed_query_completion_is_surfaced_as_an_error_to_the_caller() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let id = TaskListIdentity::root("d1", "tlQ5", TaskListType::Decision);
    let manager = TaskListManager::start(id, TaskListKind::Normal, store, &config(), None)
        .await
        .unwrap();

    let poller = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.poll("worker-1".to_string(), None, None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let querier = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .query_workflow(
                    WorkflowExecution {
                        workflow_id: "wf".to_string(),
                        run_id: "run".to_string(),
                    },
                    QueryPayload {
                        query_type: "state".to_string(),
                        args: None,
                    },
                    Duration::from_millis(500),
                )
                .await
        })
    };

    let polled = poller.await.unwrap().into_result().unwrap().expect("expected the query task");
    let query_id = match polled.item {
        MatchedItem::Query(q) => q.query_id,
        _ => panic!("expected a query"),
    };

    manager
        .respond_query_completed(
            query_id,
            QueryCompletion {
                completion_type: QueryCompletionType::Failed,
                query_result: None,
                error_message: Some("nope".to_string()),
            },
        )
        .await
        .into_result()
        .unwrap();

    match querier.await.unwrap() {
        Outcome::Invalid { reason } => assert_eq!(reason, "nope"),
        other => panic!("expected an Invalid outcome carrying the query's error message, got {other:?}"),
    }
}

/// Scenario: poll cancellation. A poller that cancels mid-wait gets an
/// empty result promptly rather than blocking out the full deadline.
#[tokio::test]
async fn cancelled_poll_returns_empty_before_the_deadline() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let id = TaskListIdentity::root("d1", "tlF2", TaskListType::Decision);
    let mut cfg = config();
    cfg.long_poll_expiration_interval = Duration::from_secs(60);
    let manager = TaskListManager::start(id, TaskListKind::Normal, store, &cfg, None)
        .await
        .unwrap();

    let poller = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.poll("p1".to_string(), None, None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.cancel_outstanding_poll("p1").await.into_result().unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(100), poller)
        .await
        .expect("cancelled poll should return well before the 60s deadline")
        .unwrap();
    assert!(matches!(outcome.into_result(), Ok(None)));
}

/// Scenario: forwarding past the first fan-in level. With the default
/// fan-in factor k = 4, partition 4 is the first child whose parent isn't
/// partition 0 — its tasks must land at partition 1, not 0.
#[tokio::test]
async fn partition_at_the_fan_in_boundary_forwards_to_partition_one() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let router = EngineRouter::new(store, config());

    let root_id = TaskListIdentity::root("d1", "tlBoundary", TaskListType::Activity);
    let leaf_id = root_id.child(4);
    let parent_id = root_id.child(1);

    let poller = {
        let router = router.clone();
        let parent_id = parent_id.clone();
        tokio::spawn(async move {
            router.poll(parent_id, TaskListKind::Normal, "parent-poller".to_string(), None).await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    router
        .add_task(leaf_id.clone(), TaskListKind::Normal, new_task(7))
        .await
        .into_result()
        .unwrap();

    let polled = poller
        .await
        .unwrap()
        .into_result()
        .unwrap()
        .expect("partition 1 poller should receive partition 4's forwarded task");
    assert_eq!(polled.forwarded_from.as_deref(), Some(leaf_id.wire_name().as_str()));
    match polled.item {
        MatchedItem::Task(t) => assert_eq!(t.schedule_id, 7),
        _ => panic!("expected a task"),
    }
}

/// Universal invariant: acking an already-acked task is a no-op, not an
/// error — `Ack` must be safe to retry after a caller-side timeout that
/// raced a successful server-side ack.
#[tokio::test]
async fn repeated_ack_of_the_same_task_is_idempotent() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let id = TaskListIdentity::root("d1", "tlG", TaskListType::Activity);
    let manager = TaskListManager::start(id, TaskListKind::Normal, store, &config(), None)
        .await
        .unwrap();

    let poller = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.poll("w1".to_string(), None, None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.add_task(new_task(1)).await.into_result().unwrap();
    let polled = poller.await.unwrap().into_result().unwrap().unwrap();
    let task_id = match polled.item {
        MatchedItem::Task(t) => t.task_id,
        _ => panic!("expected a task"),
    };

    manager.ack(task_id);
    manager.ack(task_id);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.describe().ack_level, task_id);
}
