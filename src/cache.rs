use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::SyncError;
use crate::model::{CacheEntry, EntityKind, DEFAULT_TTL_MS};
use crate::record::StoredRecord;
use crate::store::SyncDb;

/// Keyed snapshot store with TTL freshness. Purely local: nothing in here
/// ever touches the network, and reads are never gated on connectivity.
#[derive(Clone)]
pub struct CacheManager {
    db: Arc<SyncDb>,
    default_ttl_ms: u64,
}

impl CacheManager {
    pub fn new(db: Arc<SyncDb>) -> Self {
        Self::with_ttl(db, DEFAULT_TTL_MS)
    }

    pub fn with_ttl(db: Arc<SyncDb>, default_ttl_ms: u64) -> Self {
        Self { db, default_ttl_ms }
    }

    /// Write-through upsert. `confirmed` marks the data as a server
    /// response, which is the only case where `last_synced_at` is set.
    pub async fn write(
        &self,
        kind: EntityKind,
        entity_id: &str,
        data: &Value,
        confirmed: bool,
    ) -> Result<(), SyncError> {
        self.write_with_ttl(kind, entity_id, data, confirmed, self.default_ttl_ms)
            .await
    }

    pub async fn write_with_ttl(
        &self,
        kind: EntityKind,
        entity_id: &str,
        data: &Value,
        confirmed: bool,
        ttl_ms: u64,
    ) -> Result<(), SyncError> {
        let now = self.db.now();
        let entry = CacheEntry {
            kind,
            entity_id: entity_id.to_string(),
            data: serde_json::to_vec(data)?,
            written_at: now,
            ttl_ms,
            last_synced_at: confirmed.then_some(now),
        };
        self.db.put(&entry).await
    }

    /// Fresh snapshot or `None`. An expired entry reads as absent; the
    /// caller is expected to refetch from the network.
    pub async fn read(&self, kind: EntityKind, entity_id: &str) -> Result<Option<Value>, SyncError> {
        let key = CacheEntry::cache_key(kind, entity_id);
        match self.db.get::<CacheEntry>(&key).await {
            Ok(entry) => {
                if entry.is_fresh(self.db.now()) {
                    Ok(Some(entry.data_json()?))
                } else {
                    debug!(kind = kind.collection(), entity_id, "cache entry expired");
                    Ok(None)
                }
            }
            Err(SyncError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn remove(&self, kind: EntityKind, entity_id: &str) -> Result<(), SyncError> {
        let key = CacheEntry::cache_key(kind, entity_id);
        self.db.delete::<CacheEntry>(&key).await
    }

    /// Move a snapshot written under a provisional id to its server-assigned
    /// id, storing the server representation as confirmed truth.
    pub async fn rekey(
        &self,
        kind: EntityKind,
        old_id: &str,
        new_id: &str,
        data: &Value,
    ) -> Result<(), SyncError> {
        self.write(kind, new_id, data, true).await?;
        if old_id != new_id {
            self.remove(kind, old_id).await?;
        }
        Ok(())
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, SyncError> {
        let now = self.db.now();
        let mut purged = 0;
        for entry in self.db.scan::<CacheEntry>().await? {
            if !entry.is_fresh(now) {
                self.db.delete::<CacheEntry>(&entry.primary_key()).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}
