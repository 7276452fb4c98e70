use bincode::{Decode, Encode};
use redb::TableDefinition;

use crate::error::SyncError;
use crate::model::{CacheEntry, ConflictRecord, QueueItem};

pub type StaticTableDef = &'static TableDefinition<'static, &'static [u8], Vec<u8>>;

pub static CACHE_TABLE: TableDefinition<'static, &'static [u8], Vec<u8>> =
    TableDefinition::new("cache");
pub static QUEUE_TABLE: TableDefinition<'static, &'static [u8], Vec<u8>> =
    TableDefinition::new("sync_queue");
pub static CONFLICT_TABLE: TableDefinition<'static, &'static [u8], Vec<u8>> =
    TableDefinition::new("conflicts");

/// A row the durable store can persist: bincode body prefixed with a struct
/// version byte so old rows can be migrated on read.
pub trait StoredRecord: Encode + Decode<()> + Sized + Send + Sync + 'static {
    const STRUCT_VERSION: u8;

    fn primary_key(&self) -> Vec<u8>;

    fn table_def() -> StaticTableDef;

    fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        let payload = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| SyncError::Codec(e.to_string()))?;
        let mut buf = Vec::with_capacity(1 + payload.len());
        buf.push(Self::STRUCT_VERSION);
        buf.extend(payload);
        Ok(buf)
    }

    fn load_and_migrate(data: &[u8]) -> Result<Self, SyncError> {
        match data.first().copied() {
            Some(v) if v == Self::STRUCT_VERSION => {
                bincode::decode_from_slice(&data[1..], bincode::config::standard())
                    .map(|(r, _)| r)
                    .map_err(|e| SyncError::Codec(e.to_string()))
            }
            Some(v) => Err(SyncError::Codec(format!("unknown struct version {v}"))),
            None => Err(SyncError::Codec("empty row".into())),
        }
    }
}

impl StoredRecord for CacheEntry {
    const STRUCT_VERSION: u8 = 0;

    fn primary_key(&self) -> Vec<u8> {
        CacheEntry::cache_key(self.kind, &self.entity_id)
    }

    fn table_def() -> StaticTableDef {
        &CACHE_TABLE
    }
}

impl StoredRecord for QueueItem {
    // v1 added `seq`.
    const STRUCT_VERSION: u8 = 1;

    fn primary_key(&self) -> Vec<u8> {
        self.id.into_vec()
    }

    fn table_def() -> StaticTableDef {
        &QUEUE_TABLE
    }
}

impl StoredRecord for ConflictRecord {
    const STRUCT_VERSION: u8 = 0;

    fn primary_key(&self) -> Vec<u8> {
        self.id.into_vec()
    }

    fn table_def() -> StaticTableDef {
        &CONFLICT_TABLE
    }
}
