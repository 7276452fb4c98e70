//! syncopate: offline-first sync engine.
//!
//! Keeps a durable local cache and a remote REST backend eventually
//! consistent across unreliable connectivity: optimistic writes, a durable
//! retry queue drained in priority order, and explicit conflict
//! adjudication.

pub mod cache;
pub mod clock;
pub mod conflict;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod events;
pub mod memory;
pub mod model;
pub mod processor;
pub mod queue;
pub mod record;
pub mod remote;
pub mod store;

pub use engine::{Applied, EngineConfig, SyncEngine};
pub use error::SyncError;
pub use events::SyncEvent;
pub use model::{EntityKind, OperationKind, Priority, RecordId, Resolution};

#[cfg(test)]
pub mod tests;
