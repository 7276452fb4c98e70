use std::sync::Arc;

use redb::{Database, ReadableTable};
use tokio::sync::{mpsc, oneshot};

use crate::clock::Clock;
use crate::error::SyncError;
use crate::memory::MemoryBackend;
use crate::record::{StaticTableDef, StoredRecord, CACHE_TABLE, CONFLICT_TABLE, QUEUE_TABLE};

enum WriteRequest {
    Put {
        table: StaticTableDef,
        key: Vec<u8>,
        value: Vec<u8>,
        respond_to: oneshot::Sender<Result<(), SyncError>>,
    },
    Delete {
        table: StaticTableDef,
        key: Vec<u8>,
        respond_to: oneshot::Sender<Result<(), SyncError>>,
    },
}

/// Durable local store: the single owner of the `cache`, `sync_queue` and
/// `conflicts` tables. All mutations funnel through one background write
/// task so each key update is an atomic transaction; reads open their own
/// read transactions.
pub struct SyncDb {
    db: Arc<Database>,
    write_tx: mpsc::Sender<WriteRequest>,
    clock: Arc<dyn Clock>,
}

impl SyncDb {
    pub fn open(path: &str, clock: Arc<dyn Clock>) -> Result<Arc<Self>, SyncError> {
        let db = Database::create(path).map_err(|e| SyncError::Storage(e.to_string()))?;
        Ok(Self::start(db, clock))
    }

    /// Ephemeral store backed by a growable in-memory buffer. Used by tests
    /// and by hosts that opt out of persistence.
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Arc<Self>, SyncError> {
        let db = Database::builder()
            .create_with_backend(MemoryBackend::new())
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        Ok(Self::start(db, clock))
    }

    fn start(db: Database, clock: Arc<dyn Clock>) -> Arc<Self> {
        let (write_tx, mut write_rx) = mpsc::channel(100);
        let db = Arc::new(db);

        // The worker owns only the Database handle: once every SyncDb clone
        // is dropped the channel closes, the loop ends and the file lock is
        // released.
        let worker_db = db.clone();
        tokio::spawn(async move {
            while let Some(req) = write_rx.recv().await {
                handle_write(&worker_db, req);
            }
        });

        Arc::new(SyncDb {
            db,
            write_tx,
            clock,
        })
    }

    /// Create the three tables up front so first reads do not race first
    /// writes on table existence.
    pub fn create_tables(&self) -> Result<(), SyncError> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        for table in [&CACHE_TABLE, &QUEUE_TABLE, &CONFLICT_TABLE] {
            txn.open_table(*table)
                .map_err(|e| SyncError::Storage(e.to_string()))?;
        }
        txn.commit().map_err(|e| SyncError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub async fn put<R: StoredRecord>(&self, record: &R) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.write_tx
            .send(WriteRequest::Put {
                table: R::table_def(),
                key: record.primary_key(),
                value: record.to_bytes()?,
                respond_to: tx,
            })
            .await
            .map_err(|_| SyncError::ShutDown)?;
        rx.await.map_err(|_| SyncError::ShutDown)?
    }

    pub async fn delete<R: StoredRecord>(&self, key: &[u8]) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.write_tx
            .send(WriteRequest::Delete {
                table: R::table_def(),
                key: key.to_vec(),
                respond_to: tx,
            })
            .await
            .map_err(|_| SyncError::ShutDown)?;
        rx.await.map_err(|_| SyncError::ShutDown)?
    }

    pub async fn get<R: StoredRecord>(&self, key: &[u8]) -> Result<R, SyncError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        let table = txn
            .open_table(*R::table_def())
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        let row = table
            .get(key)
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        match row {
            Some(raw) => R::load_and_migrate(&raw.value()),
            None => Err(SyncError::NotFound),
        }
    }

    /// Full-table snapshot, decoded. Row order is key order; callers that
    /// need a drain order sort for themselves.
    pub async fn scan<R: StoredRecord>(&self) -> Result<Vec<R>, SyncError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        let table = txn
            .open_table(*R::table_def())
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        let mut out = Vec::new();
        let iter = table
            .iter()
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        for row in iter {
            let (_, raw) = row.map_err(|e| SyncError::Storage(e.to_string()))?;
            out.push(R::load_and_migrate(&raw.value())?);
        }
        Ok(out)
    }
}

fn handle_write(db: &Database, req: WriteRequest) {
    match req {
        WriteRequest::Put {
            table,
            key,
            value,
            respond_to,
        } => {
            let result = apply_put(db, table, &key, value);
            let _ = respond_to.send(result);
        }
        WriteRequest::Delete {
            table,
            key,
            respond_to,
        } => {
            let result = apply_delete(db, table, &key);
            let _ = respond_to.send(result);
        }
    }
}

fn apply_put(
    db: &Database,
    table: StaticTableDef,
    key: &[u8],
    value: Vec<u8>,
) -> Result<(), SyncError> {
    let txn = db
        .begin_write()
        .map_err(|e| SyncError::Storage(e.to_string()))?;
    {
        let mut t = txn
            .open_table(*table)
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        t.insert(key, value)
            .map_err(|e| SyncError::Storage(e.to_string()))?;
    }
    txn.commit().map_err(|e| SyncError::Storage(e.to_string()))?;
    Ok(())
}

fn apply_delete(db: &Database, table: StaticTableDef, key: &[u8]) -> Result<(), SyncError> {
    let txn = db
        .begin_write()
        .map_err(|e| SyncError::Storage(e.to_string()))?;
    {
        let mut t = txn
            .open_table(*table)
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        t.remove(key)
            .map_err(|e| SyncError::Storage(e.to_string()))?;
    }
    txn.commit().map_err(|e| SyncError::Storage(e.to_string()))?;
    Ok(())
}
