use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SyncError;

/// Retry ceiling for transiently failing queue items.
pub const MAX_ATTEMPTS: u32 = 5;

/// Default freshness window for cached entity snapshots: 24 hours.
pub const DEFAULT_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Closed set of entity types the engine syncs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode, Serialize, Deserialize)]
pub enum EntityKind {
    Task,
    Transaction,
    BudgetLimit,
    RecurringTask,
    UserPreferences,
}

impl EntityKind {
    /// REST collection segment for this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Task => "tasks",
            EntityKind::Transaction => "transactions",
            EntityKind::BudgetLimit => "budget-limits",
            EntityKind::RecurringTask => "recurring-tasks",
            EntityKind::UserPreferences => "user-preferences",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn default_priority(&self) -> Priority {
        match self {
            // Deletes jump the line so a re-created entity is not clobbered
            // by a stale delete later in the queue.
            OperationKind::Delete => Priority::High,
            _ => Priority::Medium,
        }
    }
}

/// Ordered so that `High > Medium > Low`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Encode, Decode, Serialize, Deserialize,
)]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// 16-byte uuid newtype that bincode can frame directly.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Encode, Decode)]
#[repr(transparent)]
pub struct RecordId([u8; 16]);

impl RecordId {
    pub fn new() -> Self {
        RecordId(*Uuid::new_v4().as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        RecordId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn parse(s: &str) -> Result<Self, SyncError> {
        Uuid::parse_str(s)
            .map(|u| RecordId(*u.as_bytes()))
            .map_err(|e| SyncError::Codec(format!("bad record id {s:?}: {e}")))
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Uuid::from_bytes(self.0).fmt(f)
    }
}

/// Materialized entity snapshot. `data` is the raw JSON of the entity,
/// optimistic or server-confirmed; `last_synced_at` is set only for the
/// latter.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct CacheEntry {
    pub kind: EntityKind,
    pub entity_id: String,
    pub data: Vec<u8>,
    pub written_at: u64,
    pub ttl_ms: u64,
    pub last_synced_at: Option<u64>,
}

impl CacheEntry {
    pub fn cache_key(kind: EntityKind, entity_id: &str) -> Vec<u8> {
        let mut key = kind.collection().as_bytes().to_vec();
        key.push(b':');
        key.extend_from_slice(entity_id.as_bytes());
        key
    }

    pub fn is_fresh(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.written_at) <= self.ttl_ms
    }

    pub fn data_json(&self) -> Result<Value, SyncError> {
        Ok(serde_json::from_slice(&self.data)?)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub enum QueueItemState {
    /// Eligible for the next drain cycle.
    Pending,
    /// Awaiting conflict resolution; skipped by drains, kept in the table.
    Parked,
}

/// A pending mutation awaiting remote application.
#[derive(Clone, Debug, Encode, Decode)]
pub struct QueueItem {
    pub id: RecordId,
    pub kind: EntityKind,
    pub op: OperationKind,
    pub entity_id: String,
    /// Raw JSON entity payload. `None` for deletes.
    pub payload: Option<Vec<u8>>,
    pub enqueued_at: u64,
    /// Monotonic enqueue sequence. `enqueued_at` has millisecond resolution,
    /// so this is what keeps FIFO order for items enqueued back-to-back. The
    /// counter restarts with the process; across restarts the timestamp
    /// already separates items.
    pub seq: u64,
    pub attempts: u32,
    pub priority: Priority,
    pub state: QueueItemState,
}

impl QueueItem {
    pub fn payload_json(&self) -> Result<Option<Value>, SyncError> {
        match &self.payload {
            Some(raw) => Ok(Some(serde_json::from_slice(raw)?)),
            None => Ok(None),
        }
    }
}

/// One diverged field, both sides as raw JSON.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct FieldDiff {
    pub field: String,
    pub local: Vec<u8>,
    pub server: Vec<u8>,
}

impl FieldDiff {
    pub fn local_json(&self) -> Result<Value, SyncError> {
        Ok(serde_json::from_slice(&self.local)?)
    }

    pub fn server_json(&self) -> Result<Value, SyncError> {
        Ok(serde_json::from_slice(&self.server)?)
    }
}

/// An unresolved divergence between the local optimistic value and what the
/// server holds. Lives until an explicit resolution re-queues the source
/// item.
#[derive(Clone, Debug, Encode, Decode)]
pub struct ConflictRecord {
    pub id: RecordId,
    /// Weak reference to the queue item that hit the conflict; lookup only.
    pub source_item: RecordId,
    pub kind: EntityKind,
    pub op: OperationKind,
    pub entity_id: String,
    pub local_value: Vec<u8>,
    pub server_value: Vec<u8>,
    pub field_diffs: Vec<FieldDiff>,
    pub detected_at: u64,
}

impl ConflictRecord {
    pub fn local_json(&self) -> Result<Value, SyncError> {
        Ok(serde_json::from_slice(&self.local_value)?)
    }

    pub fn server_json(&self) -> Result<Value, SyncError> {
        Ok(serde_json::from_slice(&self.server_value)?)
    }
}

/// How a conflict should be settled.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// Keep the local optimistic value.
    Local,
    /// Accept what the server holds.
    Server,
    /// Use a caller-supplied merged value; falls back to the local value
    /// when none is given.
    Merge(Option<Value>),
}

/// Provisional client-side id for a CREATE that has not reached the server.
pub fn provisional_id(now_ms: u64) -> String {
    format!("temp-{}-{:08x}", now_ms, rand::random::<u32>())
}

/// True for ids minted by `provisional_id`.
pub fn is_provisional(id: &str) -> bool {
    id.starts_with("temp-")
}

/// Top-level field comparison of two JSON objects, used when the server
/// signals a conflict without supplying a diff list.
pub fn diff_fields(local: &Value, server: &Value) -> Vec<FieldDiff> {
    let (Some(l), Some(s)) = (local.as_object(), server.as_object()) else {
        if local == server {
            return Vec::new();
        }
        return vec![FieldDiff {
            field: "$".to_string(),
            local: local.to_string().into_bytes(),
            server: server.to_string().into_bytes(),
        }];
    };

    let mut fields: Vec<&String> = l.keys().chain(s.keys()).collect();
    fields.sort();
    fields.dedup();

    let mut diffs = Vec::new();
    for field in fields {
        let lv = l.get(field).cloned().unwrap_or(Value::Null);
        let sv = s.get(field).cloned().unwrap_or(Value::Null);
        if lv != sv {
            diffs.push(FieldDiff {
                field: field.clone(),
                local: lv.to_string().into_bytes(),
                server: sv.to_string().into_bytes(),
            });
        }
    }
    diffs
}
