//! Saga log entry model.
//!
//! One [`LogEntry`] is appended for every state transition a saga makes,
//! before the transition takes effect. The entry sequence is the sole
//! durable truth about a saga: compensation and recovery read nothing
//! else. Records travel through storage as opaque JSON strings; this
//! module owns both directions of that codec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::params::ParamSet;

/// Result type for log record codec operations.
pub type Result<T> = std::result::Result<T, EntryError>;

/// Errors raised while marshalling log records.
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    /// The entry refused to serialize.
    #[error("log record failed to encode: {0}")]
    Encode(#[source] serde_json::Error),

    /// A stored record is not a well-formed entry.
    #[error("log record failed to decode: {0}")]
    Decode(#[source] serde_json::Error),
}

/// The seven transition kinds a saga records.
///
/// Payload placement mirrors the transition semantics: only `ActionStart`
/// carries parameters, and saga-level transitions carry no
/// sub-transaction id at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    /// The saga opened its log stream.
    SagaStart,
    /// A sub-transaction's action is about to run. `params` is the
    /// encoded argument list that also drives the compensation on replay.
    ActionStart { sub_tx_id: String, params: ParamSet },
    /// The action completed successfully.
    ActionEnd { sub_tx_id: String },
    /// Forward execution stopped; compensation follows.
    SagaAbort,
    /// A compensation call is about to run.
    CompensateStart { sub_tx_id: String },
    /// The compensation call completed successfully.
    CompensateEnd { sub_tx_id: String },
    /// The forward pass finished.
    SagaEnd,
}

impl EntryKind {
    /// The sub-transaction this entry refers to, if any.
    pub fn sub_tx_id(&self) -> Option<&str> {
        match self {
            Self::ActionStart { sub_tx_id, .. }
            | Self::ActionEnd { sub_tx_id }
            | Self::CompensateStart { sub_tx_id }
            | Self::CompensateEnd { sub_tx_id } => Some(sub_tx_id),
            Self::SagaStart | Self::SagaAbort | Self::SagaEnd => None,
        }
    }
}

/// One durably recorded saga transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonic append counter within one saga's stream. This is the
    /// ordering authority for replay; wall-clock time never breaks ties.
    pub sequence: u64,
    /// When the transition was decided. Audit display only.
    pub recorded_at: DateTime<Utc>,
    /// The transition itself.
    #[serde(flatten)]
    pub kind: EntryKind,
}

impl LogEntry {
    /// An entry stamped with the current wall clock.
    pub fn new(sequence: u64, kind: EntryKind) -> Self {
        Self {
            sequence,
            recorded_at: Utc::now(),
            kind,
        }
    }

    /// Marshal into the opaque record form the log store persists.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(EntryError::Encode)
    }

    /// Unmarshal from a stored record.
    pub fn decode(record: &str) -> Result<Self> {
        serde_json::from_str(record).map_err(EntryError::Decode)
    }
}
