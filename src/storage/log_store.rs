//! Log storage interface.

use async_trait::async_trait;

/// Result type for log store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors a log stream can surface.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The stream holds no records. `last` reports this as its own
    /// condition so callers can tell "no history" from "broken backend".
    #[error("log stream is empty")]
    Empty,

    /// The stream was closed and cannot be used again.
    #[error("log stream is closed")]
    Closed,

    /// Backend-specific failure.
    #[error("log store backend: {0}")]
    Backend(String),
}

/// Append-only persistence for one saga's log stream.
///
/// One instance serves exactly one saga. The backend is the serialization
/// point for its stream: concurrent appends must not interleave records.
/// Records are opaque to the store; the coordinator owns their encoding.
///
/// Implementations:
/// - [`MemoryLogStore`](super::MemoryLogStore): in-memory, for tests and
///   local development
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Durably append one record at the stream tail.
    async fn append(&self, record: String) -> Result<()>;

    /// All records in append order.
    async fn lookup(&self) -> Result<Vec<String>>;

    /// The most recent record; [`StoreError::Empty`] when none exists.
    async fn last(&self) -> Result<String>;

    /// Remove every record in the stream. A no-op on an empty stream.
    async fn cleanup(&self) -> Result<()>;

    /// Release whatever the backend holds for this stream.
    async fn close(&self) -> Result<()>;
}
