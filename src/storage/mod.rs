//! Log storage: the contract the coordinator drives plus the built-in
//! backend.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::SagaError;

mod log_store;
mod memory;

pub use log_store::{LogStore, Result, StoreError};
pub use memory::MemoryLogStore;

/// Log store kinds selectable at saga start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// In-memory stream, for tests and local development.
    Memory,
    /// Queue-backed stream (Kafka and friends). No backend ships with the
    /// core; embedders bring their own through
    /// [`start_saga_with_store`](crate::coordinator::ExecutionCoordinator::start_saga_with_store).
    Queue,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Queue => f.write_str("queue"),
        }
    }
}

/// Open a fresh log stream of the given kind.
///
/// Selecting a kind with no wired-in backend fails before any saga state
/// exists, so nothing needs compensating afterwards.
pub fn open_store(kind: StoreKind) -> std::result::Result<Arc<dyn LogStore>, SagaError> {
    debug!(%kind, "Opening log store");
    match kind {
        StoreKind::Memory => Ok(Arc::new(MemoryLogStore::new())),
        StoreKind::Queue => Err(SagaError::UnsupportedStore(kind)),
    }
}
