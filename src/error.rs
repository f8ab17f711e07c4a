//! Error taxonomy for the coordinator.
//!
//! Every hard failure a saga operation can surface lands in [`SagaError`].
//! Business failures are deliberately absent: an action or compensation
//! reporting a domain problem (see [`crate::subtx::BusinessFailure`]) is
//! absorbed by the abort machinery and never propagates as a hard error.

use crate::log::EntryError;
use crate::params::ParamError;
use crate::storage::{StoreError, StoreKind};

/// Result type for coordinator and saga operations.
pub type Result<T> = std::result::Result<T, SagaError>;

/// Errors that terminate the current saga operation.
#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    /// A sub-transaction id was used before being registered. A wiring
    /// defect, not a transient condition: nothing has been logged and no
    /// action has run when this is returned.
    #[error("unknown sub-transaction id: {0}")]
    UnknownSubTx(String),

    /// The same sub-transaction id was registered twice.
    #[error("duplicate sub-transaction id: {0}")]
    DuplicateSubTx(String),

    /// A log store kind with no wired-in backend was selected.
    #[error("unsupported log store kind: {0}")]
    UnsupportedStore(StoreKind),

    /// Call arguments could not be round-tripped through the log form.
    #[error("parameter round-trip failed: {0}")]
    Params(#[from] ParamError),

    /// A log record could not be encoded or decoded.
    #[error("log record codec failed: {0}")]
    Entry(#[from] EntryError),

    /// The log store failed. The log is the durability boundary, so no
    /// further progress can be trusted once it is gone.
    #[error("log store operation failed: {0}")]
    Store(#[from] StoreError),
}

impl SagaError {
    /// True for defects in the caller's wiring. `Entry` and `Store` are
    /// just as fatal to the running operation, but they describe trouble
    /// with the log stream itself rather than a mistake in the code
    /// driving it. Configuration errors are not worth retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownSubTx(_) | Self::DuplicateSubTx(_) | Self::UnsupportedStore(_) | Self::Params(_)
        )
    }
}
