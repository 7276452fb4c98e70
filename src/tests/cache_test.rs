use std::sync::Arc;

use serde_json::json;

use crate::cache::CacheManager;
use crate::clock::MockClock;
use crate::model::{CacheEntry, EntityKind};
use crate::store::SyncDb;

fn cache_fixture() -> (CacheManager, Arc<SyncDb>, Arc<MockClock>) {
    let clock = Arc::new(MockClock::new(1_000));
    let db = SyncDb::open_in_memory(clock.clone()).unwrap();
    db.create_tables().unwrap();
    (CacheManager::new(db.clone()), db, clock)
}

#[tokio::test]
async fn write_then_read_returns_snapshot() {
    let (cache, _db, _clock) = cache_fixture();
    let data = json!({"id": "t-1", "title": "Buy milk"});

    cache
        .write(EntityKind::Task, "t-1", &data, false)
        .await
        .unwrap();

    let read = cache.read(EntityKind::Task, "t-1").await.unwrap();
    assert_eq!(read, Some(data));
}

#[tokio::test]
async fn missing_entry_reads_as_absent() {
    let (cache, _db, _clock) = cache_fixture();
    let read = cache.read(EntityKind::Transaction, "nope").await.unwrap();
    assert_eq!(read, None);
}

#[tokio::test]
async fn entry_expires_after_ttl() {
    let (cache, _db, clock) = cache_fixture();
    let data = json!({"id": "t-1", "title": "short-lived"});

    cache
        .write_with_ttl(EntityKind::Task, "t-1", &data, false, 100)
        .await
        .unwrap();

    // Exactly at the TTL boundary the entry is still fresh.
    clock.advance(100);
    assert!(cache.read(EntityKind::Task, "t-1").await.unwrap().is_some());

    clock.advance(50);
    assert_eq!(cache.read(EntityKind::Task, "t-1").await.unwrap(), None);
}

#[tokio::test]
async fn last_synced_at_only_for_confirmed_writes() {
    let (cache, db, _clock) = cache_fixture();
    let data = json!({"id": "b-1", "limit": 500});

    cache
        .write(EntityKind::BudgetLimit, "b-1", &data, false)
        .await
        .unwrap();
    let key = CacheEntry::cache_key(EntityKind::BudgetLimit, "b-1");
    let entry: CacheEntry = db.get(&key).await.unwrap();
    assert_eq!(entry.last_synced_at, None);

    cache
        .write(EntityKind::BudgetLimit, "b-1", &data, true)
        .await
        .unwrap();
    let entry: CacheEntry = db.get(&key).await.unwrap();
    assert_eq!(entry.last_synced_at, Some(1_000));
}

#[tokio::test]
async fn rekey_moves_provisional_entry_to_server_id() {
    let (cache, _db, _clock) = cache_fixture();
    let local = json!({"id": "temp-1-abc", "title": "Buy milk"});
    let server = json!({"id": "srv-1", "title": "Buy milk"});

    cache
        .write(EntityKind::Task, "temp-1-abc", &local, false)
        .await
        .unwrap();
    cache
        .rekey(EntityKind::Task, "temp-1-abc", "srv-1", &server)
        .await
        .unwrap();

    assert_eq!(
        cache.read(EntityKind::Task, "temp-1-abc").await.unwrap(),
        None
    );
    assert_eq!(
        cache.read(EntityKind::Task, "srv-1").await.unwrap(),
        Some(server)
    );
}

#[tokio::test]
async fn purge_drops_expired_entries_only() {
    let (cache, _db, clock) = cache_fixture();

    cache
        .write_with_ttl(EntityKind::Task, "old", &json!({"t": 1}), false, 100)
        .await
        .unwrap();
    cache
        .write_with_ttl(EntityKind::Task, "new", &json!({"t": 2}), false, 10_000)
        .await
        .unwrap();

    clock.advance(500);
    let purged = cache.purge_expired().await.unwrap();
    assert_eq!(purged, 1);

    assert_eq!(cache.read(EntityKind::Task, "old").await.unwrap(), None);
    assert!(cache.read(EntityKind::Task, "new").await.unwrap().is_some());
}
