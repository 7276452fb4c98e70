use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::SyncError;
use crate::model::{EntityKind, OperationKind, Priority, QueueItem, QueueItemState, RecordId};
use crate::store::SyncDb;

/// Persistence operations for the durable mutation queue. The table is the
/// source of truth; nothing here keeps an authoritative in-memory mirror.
#[derive(Clone)]
pub struct SyncQueue {
    db: Arc<SyncDb>,
    /// Enqueue counter, shared across clones. Breaks FIFO ties between items
    /// stamped with the same millisecond.
    seq: Arc<AtomicU64>,
}

impl SyncQueue {
    pub fn new(db: Arc<SyncDb>) -> Self {
        Self {
            db,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn enqueue(
        &self,
        kind: EntityKind,
        op: OperationKind,
        entity_id: &str,
        payload: Option<&Value>,
    ) -> Result<QueueItem, SyncError> {
        self.enqueue_with_priority(kind, op, entity_id, payload, op.default_priority())
            .await
    }

    /// `enqueue` with an explicit priority in place of the operation's
    /// default.
    pub async fn enqueue_with_priority(
        &self,
        kind: EntityKind,
        op: OperationKind,
        entity_id: &str,
        payload: Option<&Value>,
        priority: Priority,
    ) -> Result<QueueItem, SyncError> {
        let payload = match payload {
            Some(v) => Some(serde_json::to_vec(v)?),
            None => None,
        };
        let item = QueueItem {
            id: RecordId::new(),
            kind,
            op,
            entity_id: entity_id.to_string(),
            payload,
            enqueued_at: self.db.now(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            attempts: 0,
            priority,
            state: QueueItemState::Pending,
        };
        self.db.put(&item).await?;
        debug!(item = %item.id, kind = kind.collection(), ?op, "enqueued mutation");
        Ok(item)
    }

    /// Pending items in drain order: priority descending, then FIFO by
    /// enqueue time. Parked items are excluded.
    pub async fn pending_snapshot(&self) -> Result<Vec<QueueItem>, SyncError> {
        let mut items: Vec<QueueItem> = self
            .db
            .scan::<QueueItem>()
            .await?
            .into_iter()
            .filter(|i| i.state == QueueItemState::Pending)
            .collect();
        items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.enqueued_at.cmp(&b.enqueued_at))
                .then(a.seq.cmp(&b.seq))
        });
        Ok(items)
    }

    pub async fn get(&self, id: RecordId) -> Result<QueueItem, SyncError> {
        match self.db.get::<QueueItem>(&id.into_vec()).await {
            Err(SyncError::NotFound) => Err(SyncError::UnknownQueueItem(id.to_string())),
            other => other,
        }
    }

    pub async fn save(&self, item: &QueueItem) -> Result<(), SyncError> {
        self.db.put(item).await
    }

    pub async fn remove(&self, id: RecordId) -> Result<(), SyncError> {
        self.db.delete::<QueueItem>(&id.into_vec()).await
    }

    /// Take an item out of drain rotation without deleting it, pending
    /// conflict resolution.
    pub async fn park(&self, item: &mut QueueItem) -> Result<(), SyncError> {
        item.state = QueueItemState::Parked;
        self.save(item).await
    }

    /// Number of items still awaiting remote application (parked included:
    /// an unresolved conflict is still pending work the user must see).
    pub async fn len(&self) -> Result<usize, SyncError> {
        Ok(self.db.scan::<QueueItem>().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, SyncError> {
        Ok(self.len().await? == 0)
    }
}
