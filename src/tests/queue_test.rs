use std::sync::Arc;

use serde_json::json;

use crate::clock::MockClock;
use crate::model::{EntityKind, OperationKind, Priority, QueueItemState};
use crate::queue::SyncQueue;
use crate::store::SyncDb;

fn queue_fixture() -> (SyncQueue, Arc<SyncDb>, Arc<MockClock>) {
    let clock = Arc::new(MockClock::new(1_000));
    let db = SyncDb::open_in_memory(clock.clone()).unwrap();
    db.create_tables().unwrap();
    (SyncQueue::new(db.clone()), db, clock)
}

#[tokio::test]
async fn enqueue_sets_defaults() {
    let (queue, _db, _clock) = queue_fixture();

    let update = queue
        .enqueue(
            EntityKind::Task,
            OperationKind::Update,
            "t-1",
            Some(&json!({"done": true})),
        )
        .await
        .unwrap();
    assert_eq!(update.attempts, 0);
    assert_eq!(update.priority, Priority::Medium);
    assert_eq!(update.state, QueueItemState::Pending);
    assert_eq!(update.enqueued_at, 1_000);

    let delete = queue
        .enqueue(EntityKind::Task, OperationKind::Delete, "t-2", None)
        .await
        .unwrap();
    assert_eq!(delete.priority, Priority::High);
    assert!(delete.payload.is_none());
}

#[tokio::test]
async fn snapshot_orders_by_priority_then_fifo() {
    let (queue, _db, clock) = queue_fixture();

    // Enqueued as [low, high, medium]; must drain as [high, medium, low].
    queue
        .enqueue_with_priority(
            EntityKind::Task,
            OperationKind::Update,
            "low",
            None,
            Priority::Low,
        )
        .await
        .unwrap();

    clock.advance(1);
    queue
        .enqueue(EntityKind::Task, OperationKind::Delete, "high", None)
        .await
        .unwrap();

    clock.advance(1);
    queue
        .enqueue(EntityKind::Task, OperationKind::Update, "medium", None)
        .await
        .unwrap();

    let order: Vec<String> = queue
        .pending_snapshot()
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.entity_id)
        .collect();
    assert_eq!(order, vec!["high", "medium", "low"]);
}

#[tokio::test]
async fn equal_priority_drains_fifo() {
    let (queue, _db, clock) = queue_fixture();

    for id in ["first", "second", "third"] {
        queue
            .enqueue(EntityKind::Transaction, OperationKind::Update, id, None)
            .await
            .unwrap();
        clock.advance(1);
    }

    let order: Vec<String> = queue
        .pending_snapshot()
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.entity_id)
        .collect();
    assert_eq!(order, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn same_millisecond_enqueues_stay_fifo() {
    let (queue, _db, _clock) = queue_fixture();

    // Timestamps have millisecond resolution, so back-to-back enqueues all
    // share one; order must still hold.
    for i in 0..10 {
        queue
            .enqueue(
                EntityKind::Task,
                OperationKind::Update,
                &format!("step-{i}"),
                None,
            )
            .await
            .unwrap();
    }

    let order: Vec<String> = queue
        .pending_snapshot()
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.entity_id)
        .collect();
    let expected: Vec<String> = (0..10).map(|i| format!("step-{i}")).collect();
    assert_eq!(order, expected);
}

#[tokio::test]
async fn parked_items_are_skipped_but_counted() {
    let (queue, _db, _clock) = queue_fixture();

    let mut item = queue
        .enqueue(EntityKind::Task, OperationKind::Update, "t-1", None)
        .await
        .unwrap();
    queue.park(&mut item).await.unwrap();

    assert!(queue.pending_snapshot().await.unwrap().is_empty());
    // Parked work is still pending work as far as the UI indicator goes.
    assert_eq!(queue.len().await.unwrap(), 1);
}

#[tokio::test]
async fn items_survive_in_the_table_until_removed() {
    let (queue, _db, _clock) = queue_fixture();

    let item = queue
        .enqueue(EntityKind::RecurringTask, OperationKind::Create, "r-1", None)
        .await
        .unwrap();

    let reloaded = queue.get(item.id).await.unwrap();
    assert_eq!(reloaded.entity_id, "r-1");

    queue.remove(item.id).await.unwrap();
    assert!(queue.is_empty().await.unwrap());
    assert!(queue.get(item.id).await.is_err());
}
