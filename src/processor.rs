use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::CacheManager;
use crate::connectivity::ConnectivityGate;
use crate::error::SyncError;
use crate::events::{EventBus, SyncEvent};
use crate::model::{diff_fields, ConflictRecord, OperationKind, QueueItem, RecordId};
use crate::queue::SyncQueue;
use crate::remote::{PushOutcome, RemoteApi, RemoteError};
use crate::store::SyncDb;

/// What one drain cycle did. `skipped` covers the no-op cases: offline, or
/// another cycle already in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub skipped: bool,
    pub succeeded: usize,
    pub conflicts: usize,
    pub failed: usize,
    pub deferred: usize,
}

/// Drains the durable queue against the backend.
///
/// Items are dispatched strictly sequentially in (priority desc, enqueue
/// asc) order: concurrent PATCH/DELETE on the same entity could land out of
/// order server-side, so at most one mutation is ever in flight. A process-
/// wide single-flight guard collapses overlapping drain requests; items
/// enqueued mid-cycle wait for the next trigger.
pub struct QueueProcessor {
    db: Arc<SyncDb>,
    cache: CacheManager,
    queue: SyncQueue,
    remote: Arc<dyn RemoteApi>,
    events: EventBus,
    gate: ConnectivityGate,
    drain_lock: Mutex<()>,
    max_attempts: u32,
}

impl QueueProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<SyncDb>,
        cache: CacheManager,
        queue: SyncQueue,
        remote: Arc<dyn RemoteApi>,
        events: EventBus,
        gate: ConnectivityGate,
        max_attempts: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            cache,
            queue,
            remote,
            events,
            gate,
            drain_lock: Mutex::new(()),
            max_attempts,
        })
    }

    /// Fire-and-forget drain. The caller never waits on network completion;
    /// results come back over the event bus.
    pub fn trigger(self: &Arc<Self>) {
        let processor = self.clone();
        tokio::spawn(async move {
            if let Err(e) = processor.drain().await {
                warn!(error = %e, "drain cycle aborted");
            }
        });
    }

    /// Run one drain cycle. Returns immediately (skipped) when offline or
    /// when another cycle holds the single-flight guard.
    pub async fn drain(&self) -> Result<DrainReport, SyncError> {
        if !self.gate.is_online() {
            debug!("drain requested while offline");
            return Ok(DrainReport {
                skipped: true,
                ..DrainReport::default()
            });
        }
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!("drain already in flight");
            return Ok(DrainReport {
                skipped: true,
                ..DrainReport::default()
            });
        };

        // Snapshot once: work enqueued mid-cycle belongs to the next one.
        let items = self.queue.pending_snapshot().await?;
        if items.is_empty() {
            return Ok(DrainReport::default());
        }
        info!(pending = items.len(), "draining sync queue");

        let mut report = DrainReport::default();
        for item in items {
            match self.process_item(item).await? {
                ItemOutcome::Done => report.succeeded += 1,
                ItemOutcome::Conflicted => report.conflicts += 1,
                ItemOutcome::Dropped => report.failed += 1,
                ItemOutcome::Deferred => report.deferred += 1,
            }
        }
        info!(?report, "drain cycle finished");
        Ok(report)
    }

    async fn process_item(&self, mut item: QueueItem) -> Result<ItemOutcome, SyncError> {
        let payload = item.payload_json()?;
        let result = self
            .remote
            .push(item.kind, item.op, &item.entity_id, payload.as_ref())
            .await;

        match result {
            Ok(PushOutcome::Applied(server_data)) => {
                self.reconcile_success(&item, payload, server_data).await?;
                Ok(ItemOutcome::Done)
            }
            Ok(PushOutcome::Conflict {
                server_value,
                field_diffs,
            }) => {
                self.record_conflict(&mut item, payload, server_value, field_diffs)
                    .await?;
                Ok(ItemOutcome::Conflicted)
            }
            Err(RemoteError::Transient(msg)) => {
                item.attempts += 1;
                if item.attempts >= self.max_attempts {
                    warn!(item = %item.id, attempts = item.attempts, "retry ceiling hit, dropping");
                    self.queue.remove(item.id).await?;
                    self.events.emit(SyncEvent::Failed {
                        kind: item.kind,
                        op: item.op,
                        entity_id: item.entity_id.clone(),
                        error: msg,
                        attempts: item.attempts,
                    });
                    Ok(ItemOutcome::Dropped)
                } else {
                    debug!(item = %item.id, attempts = item.attempts, error = %msg, "transient failure, will retry");
                    self.queue.save(&item).await?;
                    Ok(ItemOutcome::Deferred)
                }
            }
            Err(RemoteError::Permanent { status, message }) => {
                warn!(item = %item.id, status, "permanent rejection, dropping");
                self.queue.remove(item.id).await?;
                self.events.emit(SyncEvent::Failed {
                    kind: item.kind,
                    op: item.op,
                    entity_id: item.entity_id.clone(),
                    error: format!("HTTP {status}: {message}"),
                    attempts: item.attempts + 1,
                });
                Ok(ItemOutcome::Dropped)
            }
        }
    }

    /// Reconcile the cache with server truth and retire the queue item.
    async fn reconcile_success(
        &self,
        item: &QueueItem,
        local_payload: Option<Value>,
        server_data: Option<Value>,
    ) -> Result<(), SyncError> {
        match item.op {
            OperationKind::Delete => {
                self.cache.remove(item.kind, &item.entity_id).await?;
            }
            OperationKind::Create | OperationKind::Update => {
                // Prefer the server representation; a provisional id moves
                // to the server-assigned one.
                if let Some(server) = &server_data {
                    let new_id = server_entity_id(server)
                        .unwrap_or_else(|| item.entity_id.clone());
                    self.cache
                        .rekey(item.kind, &item.entity_id, &new_id, server)
                        .await?;
                } else if let Some(local) = &local_payload {
                    self.cache
                        .write(item.kind, &item.entity_id, local, true)
                        .await?;
                }
            }
        }
        self.queue.remove(item.id).await?;
        self.events.emit(SyncEvent::Success {
            kind: item.kind,
            op: item.op,
            entity_id: item.entity_id.clone(),
            server_data,
        });
        Ok(())
    }

    /// Persist a conflict record and park the source item until someone
    /// adjudicates. Conflicts are never auto-resolved.
    async fn record_conflict(
        &self,
        item: &mut QueueItem,
        local_payload: Option<Value>,
        server_value: Value,
        field_diffs: Option<Vec<crate::model::FieldDiff>>,
    ) -> Result<(), SyncError> {
        let local_value = match local_payload {
            Some(v) => v,
            // A conflicting delete has no payload; the cached snapshot is
            // the best local side we can show the user.
            None => self
                .cache
                .read(item.kind, &item.entity_id)
                .await?
                .unwrap_or(Value::Null),
        };
        let field_diffs =
            field_diffs.unwrap_or_else(|| diff_fields(&local_value, &server_value));

        let conflict = ConflictRecord {
            id: RecordId::new(),
            source_item: item.id,
            kind: item.kind,
            op: item.op,
            entity_id: item.entity_id.clone(),
            local_value: local_value.to_string().into_bytes(),
            server_value: server_value.to_string().into_bytes(),
            field_diffs,
            detected_at: self.db.now(),
        };
        let conflict_id = conflict.id;
        self.db.put(&conflict).await?;
        self.queue.park(item).await?;

        warn!(item = %item.id, conflict = %conflict_id, entity_id = %item.entity_id, "conflict detected");
        self.events.emit(SyncEvent::Conflict {
            kind: item.kind,
            op: item.op,
            entity_id: item.entity_id.clone(),
            conflict_id,
        });
        Ok(())
    }
}

enum ItemOutcome {
    Done,
    Conflicted,
    Dropped,
    Deferred,
}

/// Server-assigned entity id from a response body, if the body names one.
fn server_entity_id(body: &Value) -> Option<String> {
    match body.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::server_entity_id;
    use serde_json::json;

    #[test]
    fn server_id_accepts_strings_and_numbers() {
        assert_eq!(
            server_entity_id(&json!({"id": "srv-1"})),
            Some("srv-1".into())
        );
        assert_eq!(server_entity_id(&json!({"id": 7})), Some("7".into()));
        assert_eq!(server_entity_id(&json!({"title": "x"})), None);
    }
}
