use thiserror::Error;

/// Errors surfaced synchronously by the engine.
///
/// Remote failures during queue draining are *not* here on purpose: the
/// optimistic-update contract forbids them from reaching the original caller
/// of `apply`, so they travel over the event bus instead (see `events`).
#[derive(Debug, Error, Clone)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Codec(String),

    #[error("http client error: {0}")]
    Http(String),

    #[error("entity not found")]
    NotFound,

    #[error("invalid mutation: {0}")]
    InvalidMutation(String),

    #[error("unknown conflict: {0}")]
    UnknownConflict(String),

    #[error("unknown queue item: {0}")]
    UnknownQueueItem(String),

    #[error("engine is shut down")]
    ShutDown,
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Codec(e.to_string())
    }
}
