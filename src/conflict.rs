use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::error::SyncError;
use crate::model::{ConflictRecord, QueueItem, QueueItemState, RecordId, Resolution};
use crate::queue::SyncQueue;
use crate::store::SyncDb;

/// Applies an explicit resolution to a stored conflict and puts the source
/// queue item back into drain rotation. Policy lives with the caller (human
/// or automated); this component never picks a side on its own.
#[derive(Clone)]
pub struct ConflictResolver {
    db: Arc<SyncDb>,
    queue: SyncQueue,
}

impl ConflictResolver {
    pub fn new(db: Arc<SyncDb>, queue: SyncQueue) -> Self {
        Self { db, queue }
    }

    pub async fn list(&self) -> Result<Vec<ConflictRecord>, SyncError> {
        self.db.scan::<ConflictRecord>().await
    }

    pub async fn get(&self, id: RecordId) -> Result<ConflictRecord, SyncError> {
        match self.db.get::<ConflictRecord>(&id.into_vec()).await {
            Err(SyncError::NotFound) => Err(SyncError::UnknownConflict(id.to_string())),
            other => other,
        }
    }

    /// Rewrite the originating queue item with the chosen payload, reset its
    /// attempt count, re-mark it pending and delete the conflict record.
    /// Returns the re-queued item; the engine follows up with a drain.
    pub async fn resolve(
        &self,
        conflict_id: RecordId,
        resolution: Resolution,
    ) -> Result<QueueItem, SyncError> {
        let conflict = self.get(conflict_id).await?;

        let resolved: Value = match resolution {
            Resolution::Local => conflict.local_json()?,
            Resolution::Server => conflict.server_json()?,
            Resolution::Merge(Some(merged)) => merged,
            // No merged value supplied: keep the local side.
            Resolution::Merge(None) => conflict.local_json()?,
        };

        let mut item = self.queue.get(conflict.source_item).await?;
        item.payload = Some(serde_json::to_vec(&resolved)?);
        item.attempts = 0;
        item.state = QueueItemState::Pending;
        self.queue.save(&item).await?;

        self.db
            .delete::<ConflictRecord>(&conflict_id.into_vec())
            .await?;

        info!(conflict = %conflict_id, item = %item.id, "conflict resolved, item re-queued");
        Ok(item)
    }
}
