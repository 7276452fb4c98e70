use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::clock::MockClock;
use crate::engine::{EngineConfig, SyncEngine};
use crate::model::{EntityKind, OperationKind};
use crate::remote::{PushOutcome, RemoteApi, RemoteError};
use crate::store::SyncDb;

#[derive(Clone, Debug)]
pub struct Call {
    pub kind: EntityKind,
    pub op: OperationKind,
    pub entity_id: String,
    pub payload: Option<Value>,
}

/// Scripted backend: responses are consumed front-to-back, one per push.
/// With an empty script every push succeeds with no response body.
pub struct MockRemote {
    script: Mutex<VecDeque<Result<PushOutcome, RemoteError>>>,
    calls: Mutex<Vec<Call>>,
    delay: Option<Duration>,
    /// When set, pushes never complete. Models a request that is still in
    /// flight, for optimistic-return assertions.
    never_resolve: AtomicBool,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            delay: None,
            never_resolve: AtomicBool::new(false),
        })
    }

    /// Every push sleeps first, so overlapping drains can be provoked.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            delay: Some(delay),
            never_resolve: AtomicBool::new(false),
        })
    }

    pub fn hanging() -> Arc<Self> {
        let remote = Self::new();
        remote.never_resolve.store(true, Ordering::SeqCst);
        remote
    }

    pub fn push_response(&self, response: Result<PushOutcome, RemoteError>) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn push(
        &self,
        kind: EntityKind,
        op: OperationKind,
        entity_id: &str,
        payload: Option<&Value>,
    ) -> Result<PushOutcome, RemoteError> {
        self.calls.lock().unwrap().push(Call {
            kind,
            op,
            entity_id: entity_id.to_string(),
            payload: payload.cloned(),
        });

        if self.never_resolve.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or(Ok(PushOutcome::Applied(None)))
    }
}

/// In-memory engine with a frozen clock. `drain_on_apply` is off so tests
/// control exactly when drains happen.
pub fn test_engine(
    start_online: bool,
    remote: Arc<MockRemote>,
) -> (Arc<SyncEngine>, Arc<SyncDb>, Arc<MockClock>) {
    let clock = Arc::new(MockClock::new(1_000));
    let db = SyncDb::open_in_memory(clock.clone()).unwrap();
    let config = EngineConfig {
        start_online,
        drain_on_apply: false,
        ..EngineConfig::default()
    };
    let engine = SyncEngine::new(config, db.clone(), remote).unwrap();
    (engine, db, clock)
}
