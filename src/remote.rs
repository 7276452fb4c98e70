use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::SyncError;
use crate::model::{EntityKind, FieldDiff, OperationKind};

/// Result of pushing one mutation to the backend.
#[derive(Clone, Debug)]
pub enum PushOutcome {
    /// 2xx. Carries the server's representation of the entity when the
    /// response had a body (deletes usually do not).
    Applied(Option<Value>),
    /// HTTP 409, or a 2xx body carrying an explicit `conflict: true` marker.
    Conflict {
        server_value: Value,
        /// Field diff list as reported by the server, if it sent one.
        field_diffs: Option<Vec<FieldDiff>>,
    },
}

#[derive(Clone, Debug)]
pub enum RemoteError {
    /// 5xx, transport failure or timeout. Worth retrying.
    Transient(String),
    /// 4xx other than 409. Retrying would fail identically.
    Permanent { status: u16, message: String },
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Transient(msg) => write!(f, "transient remote failure: {msg}"),
            RemoteError::Permanent { status, message } => {
                write!(f, "remote rejected request (HTTP {status}): {message}")
            }
        }
    }
}

/// The backend seam the queue processor drains against. Mutations only; the
/// engine never fetches through this interface.
#[async_trait]
pub trait RemoteApi: Send + Sync + 'static {
    async fn push(
        &self,
        kind: EntityKind,
        op: OperationKind,
        entity_id: &str,
        payload: Option<&Value>,
    ) -> Result<PushOutcome, RemoteError>;
}

/// Bearer credential provider. Auth flows live outside the engine; this is
/// the whole contract.
pub trait TokenSource: Send + Sync + 'static {
    fn token(&self) -> Option<String>;
}

/// Static token, mostly for tests and single-user tools.
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// REST client for the real backend: CREATE→POST, UPDATE→PATCH, DELETE→DELETE
/// against `/{collection}[/{id}]`, with a bounded per-request timeout that
/// maps to a transient failure on expiry.
pub struct HttpRemote {
    base_url: String,
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
}

impl HttpRemote {
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
            tokens,
        })
    }

    fn endpoint(&self, kind: EntityKind, op: OperationKind, entity_id: &str) -> String {
        let collection = kind.collection();
        match op {
            OperationKind::Create => format!("{}/{}", self.base_url, collection),
            OperationKind::Update | OperationKind::Delete => {
                format!("{}/{}/{}", self.base_url, collection, entity_id)
            }
        }
    }
}

/// Pull a `FieldDiff` list out of a server conflict body, if present.
fn parse_field_diffs(body: &Value) -> Option<Vec<FieldDiff>> {
    let list = body.get("conflicts")?.as_array()?;
    let mut diffs = Vec::with_capacity(list.len());
    for entry in list {
        let field = entry.get("field")?.as_str()?.to_string();
        let local = entry.get("localValue").cloned().unwrap_or(Value::Null);
        let server = entry.get("serverValue").cloned().unwrap_or(Value::Null);
        diffs.push(FieldDiff {
            field,
            local: local.to_string().into_bytes(),
            server: server.to_string().into_bytes(),
        });
    }
    Some(diffs)
}

fn conflict_outcome(body: Value) -> PushOutcome {
    let field_diffs = parse_field_diffs(&body);
    let server_value = body.get("serverData").cloned().unwrap_or(body);
    PushOutcome::Conflict {
        server_value,
        field_diffs,
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn push(
        &self,
        kind: EntityKind,
        op: OperationKind,
        entity_id: &str,
        payload: Option<&Value>,
    ) -> Result<PushOutcome, RemoteError> {
        let url = self.endpoint(kind, op, entity_id);
        let mut request = match op {
            OperationKind::Create => self.client.post(&url),
            OperationKind::Update => self.client.patch(&url),
            OperationKind::Delete => self.client.delete(&url),
        };
        if let Some(token) = self.tokens.token() {
            request = request.bearer_auth(token);
        }
        // Deletes carry no body even if the queue item still holds one
        // (a resolved conflict rewrites payloads indiscriminately).
        if op != OperationKind::Delete {
            if let Some(body) = payload {
                request = request.json(body);
            }
        }

        debug!(%url, ?op, "pushing mutation");
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        let body: Option<Value> = serde_json::from_str(&text).ok();

        if status.is_success() {
            // A 2xx body can still signal divergence through the explicit
            // conflict marker.
            if let Some(b) = &body {
                if b.get("conflict").and_then(Value::as_bool) == Some(true) {
                    return Ok(conflict_outcome(b.clone()));
                }
            }
            return Ok(PushOutcome::Applied(body));
        }

        if status.as_u16() == 409 {
            return Ok(conflict_outcome(body.unwrap_or(Value::Null)));
        }

        if status.is_server_error() {
            return Err(RemoteError::Transient(format!("HTTP {status}: {text}")));
        }

        let message = body
            .as_ref()
            .and_then(|b| b.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(text);
        Err(RemoteError::Permanent {
            status: status.as_u16(),
            message,
        })
    }
}
