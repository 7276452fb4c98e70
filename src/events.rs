use serde_json::Value;
use tokio::sync::broadcast;

use crate::model::{EntityKind, OperationKind, RecordId};

/// Asynchronous completion channel for work the optimistic `apply` contract
/// would not let surface synchronously. Every dropped or conflicted item is
/// announced here exactly once; nothing vanishes silently.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    /// A queued mutation was applied remotely and the cache reconciled.
    Success {
        kind: EntityKind,
        op: OperationKind,
        entity_id: String,
        /// Server representation, when the response carried one.
        server_data: Option<Value>,
    },
    /// Divergence detected; a conflict record now awaits adjudication.
    Conflict {
        kind: EntityKind,
        op: OperationKind,
        entity_id: String,
        conflict_id: RecordId,
    },
    /// The item was dropped: either a permanent 4xx or the retry ceiling.
    Failed {
        kind: EntityKind,
        op: OperationKind,
        entity_id: String,
        error: String,
        attempts: u32,
    },
}

const EVENT_CAPACITY: usize = 64;

/// Typed broadcast bus. Subscribers that lag past the buffer miss old
/// events (tokio broadcast semantics); UI listeners should resync counters
/// from the queue on `Lagged`.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SyncEvent) {
        // Send only fails when nobody is listening, which is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
