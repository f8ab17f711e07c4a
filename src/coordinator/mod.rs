//! Execution coordinator: registry owner, saga factory, crash recovery.
//!
//! A coordinator is configured once per workflow family with its
//! sub-transaction definitions, then shared by any number of concurrently
//! running sagas. It is also the entry point for recovering a saga from a
//! persisted log after a crash.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{AbortLogPolicy, CoordinatorConfig};
use crate::context::{SagaContext, SagaId};
use crate::error::{Result, SagaError};
use crate::log::{EntryKind, LogEntry};
use crate::params::SagaArgs;
use crate::saga::{pending_compensations, AbortReport, Saga};
use crate::storage::{open_store, LogStore, StoreKind};
use crate::subtx::{BusinessResult, SubTxDef, SubTxRegistry};

/// Builder collecting sub-transaction definitions before freezing them.
///
/// Obtained from [`ExecutionCoordinator::builder`]. Registration happens
/// once, up front; after [`build`](Self::build) the definitions are
/// immutable and shared read-only by every saga.
#[derive(Debug)]
pub struct CoordinatorBuilder {
    defs: HashMap<String, SubTxDef>,
    config: CoordinatorConfig,
}

impl CoordinatorBuilder {
    fn new() -> Self {
        Self {
            defs: HashMap::new(),
            config: CoordinatorConfig::default(),
        }
    }

    /// Register a sub-transaction: an id, a forward action, and its
    /// reverse compensation.
    ///
    /// The shared argument tuple type `A` ties both functions to one
    /// signature, so the arguments logged for the action always fit the
    /// compensation. Registering an id twice is a configuration error.
    pub fn sub_tx<A, FA, FutA, FC, FutC>(
        mut self,
        id: &str,
        action: FA,
        compensation: FC,
    ) -> Result<Self>
    where
        A: SagaArgs + 'static,
        FA: Fn(SagaContext, A) -> FutA + Send + Sync + 'static,
        FutA: Future<Output = BusinessResult> + Send + 'static,
        FC: Fn(SagaContext, A) -> FutC + Send + Sync + 'static,
        FutC: Future<Output = BusinessResult> + Send + 'static,
    {
        if self.defs.contains_key(id) {
            return Err(SagaError::DuplicateSubTx(id.to_string()));
        }
        self.defs
            .insert(id.to_string(), SubTxDef::new(id, action, compensation));
        Ok(self)
    }

    /// Replace the default configuration.
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Freeze the registry and produce the coordinator.
    pub fn build(self) -> ExecutionCoordinator {
        debug!(sub_transactions = self.defs.len(), "Coordinator built");
        ExecutionCoordinator {
            registry: Arc::new(SubTxRegistry::from_defs(self.defs)),
            config: self.config,
        }
    }
}

/// Owner of the sub-transaction registry; creates and recovers sagas.
///
/// Cheap to clone: clones share the same frozen registry.
#[derive(Debug, Clone)]
pub struct ExecutionCoordinator {
    registry: Arc<SubTxRegistry>,
    config: CoordinatorConfig,
}

impl ExecutionCoordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// The shared, read-only registry.
    pub fn registry(&self) -> &SubTxRegistry {
        &self.registry
    }

    /// Start a saga against a fresh log stream of the given kind.
    ///
    /// The `SagaStart` entry is appended before this returns; a saga with
    /// nothing durably recorded does not exist.
    pub async fn start_saga(
        &self,
        ctx: SagaContext,
        id: impl Into<SagaId>,
        kind: StoreKind,
    ) -> Result<Saga> {
        let store = open_store(kind)?;
        self.start_saga_with_store(ctx, id, store).await
    }

    /// Start a saga against an externally provided log stream.
    ///
    /// The stream must be fresh and must not be shared with another live
    /// saga: one saga instance is the only writer of its stream.
    pub async fn start_saga_with_store(
        &self,
        ctx: SagaContext,
        id: impl Into<SagaId>,
        store: Arc<dyn LogStore>,
    ) -> Result<Saga> {
        let mut saga = Saga::new(
            id.into(),
            ctx,
            Arc::clone(&self.registry),
            self.config.clone(),
            store,
        );
        saga.record(EntryKind::SagaStart).await?;
        info!(
            saga_id = %saga.id(),
            correlation_id = saga.context().correlation_id(),
            "Saga started"
        );
        Ok(saga)
    }

    /// Recover a saga from its persisted log after a crash.
    ///
    /// The caller must guarantee the crashed writer is gone before
    /// handing the stream over. The log alone decides what happens:
    ///
    /// - an empty stream needs nothing ([`Recovery::Clean`]);
    /// - a stream ending in `SagaEnd` had finished its forward pass, so
    ///   only the interrupted cleanup is completed
    ///   ([`Recovery::Completed`]);
    /// - a stream whose every `ActionStart` is covered by a
    ///   `CompensateEnd` has nothing left to undo
    ///   ([`Recovery::AlreadyCompensated`]);
    /// - anything else is rolled back: uncovered actions are compensated
    ///   newest first, skipping the ones an interrupted abort already
    ///   finished ([`Recovery::RolledBack`]).
    ///
    /// Forward resumption is never attempted. The chain of `exec_sub`
    /// calls lives in caller code, not in the log, so rolling back is the
    /// only honest way to reach a consistent state. Compensations must be
    /// idempotent; an interrupted abort means some of them may run twice.
    pub async fn recover(
        &self,
        ctx: SagaContext,
        id: impl Into<SagaId>,
        store: Arc<dyn LogStore>,
    ) -> Result<Recovery> {
        let id = id.into();
        let records = store.lookup().await?;
        if records.is_empty() {
            debug!(saga_id = %id, "Recovery found an empty stream");
            return Ok(Recovery::Clean);
        }
        let entries = records
            .iter()
            .map(|r| LogEntry::decode(r))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if matches!(entries.last().map(|e| &e.kind), Some(EntryKind::SagaEnd)) {
            store.cleanup().await?;
            info!(saga_id = %id, "Recovered saga had ended, finished the interrupted cleanup");
            return Ok(Recovery::Completed);
        }

        let pending = pending_compensations(&entries);
        let abort_logged = entries
            .iter()
            .any(|e| matches!(e.kind, EntryKind::SagaAbort));

        if pending.is_empty() && abort_logged {
            if self.config.abort_log == AbortLogPolicy::Clear {
                store.cleanup().await?;
            }
            info!(saga_id = %id, "Recovered saga was already fully compensated");
            return Ok(Recovery::AlreadyCompensated);
        }

        let last_sequence = entries.last().map(|e| e.sequence).unwrap_or(0);
        warn!(
            saga_id = %id,
            pending = pending.len(),
            "Recovering interrupted saga by rolling back"
        );
        let mut saga = Saga::resume(
            id,
            ctx,
            Arc::clone(&self.registry),
            self.config.clone(),
            store,
            last_sequence,
        );
        saga.run_compensation(pending, abort_logged).await?;
        let report = saga.abort_report().cloned().unwrap_or_default();
        Ok(Recovery::RolledBack(report))
    }
}

/// What [`ExecutionCoordinator::recover`] found and did.
#[derive(Debug)]
pub enum Recovery {
    /// The stream holds no records; nothing ever started, or a finished
    /// saga already cleaned up after itself.
    Clean,
    /// The forward pass had ended; the interrupted cleanup was finished.
    Completed,
    /// An earlier abort had already compensated every recorded action.
    AlreadyCompensated,
    /// Outstanding actions were compensated in reverse order.
    RolledBack(AbortReport),
}
