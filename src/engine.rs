use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::CacheManager;
use crate::conflict::ConflictResolver;
use crate::connectivity::ConnectivityGate;
use crate::error::SyncError;
use crate::events::{EventBus, SyncEvent};
use crate::model::{
    provisional_id, ConflictRecord, EntityKind, OperationKind, RecordId, Resolution,
    DEFAULT_TTL_MS, MAX_ATTEMPTS,
};
use crate::processor::{DrainReport, QueueProcessor};
use crate::queue::SyncQueue;
use crate::remote::RemoteApi;
use crate::store::SyncDb;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Freshness window for cached snapshots, milliseconds.
    pub default_ttl_ms: u64,
    /// Attempts before a transiently failing item is dropped.
    pub max_attempts: u32,
    /// Trigger a drain right after each optimistic apply (when online).
    pub drain_on_apply: bool,
    /// Connectivity assumption at construction time.
    pub start_online: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_TTL_MS,
            max_attempts: MAX_ATTEMPTS,
            drain_on_apply: true,
            start_online: true,
        }
    }
}

/// Outcome of an optimistic apply: the data is already readable locally.
/// Remote application happens later; watch the event bus for it.
#[derive(Clone, Debug)]
pub struct Applied {
    pub entity_id: String,
    pub data: Value,
}

/// The sync engine root. Explicitly constructed and passed around by the
/// host application; owns its background connectivity listener via
/// `init` / `shutdown`.
pub struct SyncEngine {
    config: EngineConfig,
    db: Arc<SyncDb>,
    cache: CacheManager,
    queue: SyncQueue,
    processor: Arc<QueueProcessor>,
    resolver: ConflictResolver,
    gate: ConnectivityGate,
    events: EventBus,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        config: EngineConfig,
        db: Arc<SyncDb>,
        remote: Arc<dyn RemoteApi>,
    ) -> Result<Arc<Self>, SyncError> {
        db.create_tables()?;

        let cache = CacheManager::with_ttl(db.clone(), config.default_ttl_ms);
        let queue = SyncQueue::new(db.clone());
        let gate = ConnectivityGate::new(config.start_online);
        let events = EventBus::new();
        let processor = QueueProcessor::new(
            db.clone(),
            cache.clone(),
            queue.clone(),
            remote,
            events.clone(),
            gate.clone(),
            config.max_attempts,
        );
        let resolver = ConflictResolver::new(db.clone(), queue.clone());

        Ok(Arc::new(Self {
            config,
            db,
            cache,
            queue,
            processor,
            resolver,
            gate,
            events,
            listener: Mutex::new(None),
        }))
    }

    /// Start the connectivity listener: every offline→online edge triggers
    /// one drain cycle. Idempotent.
    pub async fn init(self: &Arc<Self>) {
        let mut slot = self.listener.lock().await;
        if slot.is_some() {
            return;
        }
        let mut rx = self.gate.watch();
        rx.borrow_and_update();
        let processor = self.processor.clone();
        *slot = Some(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                if *rx.borrow_and_update() {
                    info!("connection restored, draining queue");
                    processor.trigger();
                }
            }
        }));
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
    }

    /// Apply a mutation optimistically: cache first, then enqueue, then
    /// (when online) kick the processor without waiting on it. The returned
    /// data is readable via `read` before any network request completes.
    /// Only local-store failures surface here.
    pub async fn apply(
        &self,
        kind: EntityKind,
        op: OperationKind,
        payload: Value,
        local_id: Option<String>,
    ) -> Result<Applied, SyncError> {
        let (entity_id, payload) = self.identify(op, payload, local_id)?;

        match op {
            OperationKind::Delete => {
                self.cache.remove(kind, &entity_id).await?;
                self.queue.enqueue(kind, op, &entity_id, None).await?;
            }
            _ => {
                self.cache.write(kind, &entity_id, &payload, false).await?;
                self.queue
                    .enqueue(kind, op, &entity_id, Some(&payload))
                    .await?;
            }
        }

        if self.config.drain_on_apply && self.gate.is_online() {
            self.processor.trigger();
        }

        Ok(Applied {
            entity_id,
            data: payload,
        })
    }

    /// Entity id for a mutation: explicit local id, the payload's own `id`,
    /// or a freshly minted provisional id (creates only).
    fn identify(
        &self,
        op: OperationKind,
        mut payload: Value,
        local_id: Option<String>,
    ) -> Result<(String, Value), SyncError> {
        let from_payload = payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let entity_id = match local_id.or(from_payload) {
            Some(id) => id,
            None if op == OperationKind::Create => provisional_id(self.db.now()),
            None => {
                return Err(SyncError::InvalidMutation(format!(
                    "{op:?} requires an entity id"
                )))
            }
        };
        if op != OperationKind::Delete {
            if let Some(obj) = payload.as_object_mut() {
                obj.entry("id".to_string())
                    .or_insert(Value::String(entity_id.clone()));
            }
        }
        Ok((entity_id, payload))
    }

    /// Cached snapshot, TTL-checked. Never touches the network and never
    /// waits on connectivity.
    pub async fn read(&self, kind: EntityKind, id: &str) -> Result<Option<Value>, SyncError> {
        self.cache.read(kind, id).await
    }

    /// Settle a conflict and immediately try to push the resolved payload.
    pub async fn resolve(
        &self,
        conflict_id: RecordId,
        resolution: Resolution,
    ) -> Result<(), SyncError> {
        self.resolver.resolve(conflict_id, resolution).await?;
        self.processor.trigger();
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Feed a platform connectivity transition in.
    pub fn set_online(&self, online: bool) {
        self.gate.set_online(online);
    }

    pub fn is_online(&self) -> bool {
        self.gate.is_online()
    }

    /// Items still awaiting remote application (parked conflicts included);
    /// the UI pending-indicator contract.
    pub async fn pending_count(&self) -> Result<usize, SyncError> {
        self.queue.len().await
    }

    pub async fn conflicts(&self) -> Result<Vec<ConflictRecord>, SyncError> {
        self.resolver.list().await
    }

    /// Run a drain cycle and wait for it; mostly for hosts that want a
    /// "sync now" button. `trigger_drain` is the fire-and-forget variant.
    pub async fn drain(&self) -> Result<DrainReport, SyncError> {
        self.processor.drain().await
    }

    pub fn trigger_drain(&self) {
        self.processor.trigger();
    }

    pub async fn purge_expired(&self) -> Result<usize, SyncError> {
        self.cache.purge_expired().await
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }
}
