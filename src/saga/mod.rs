//! One running saga: forward execution and the abort state machine.
//!
//! A [`Saga`] owns its log stream and drives it through the transition
//! grammar: `SagaStart`, then `ActionStart`/`ActionEnd` pairs, and either
//! `SagaEnd` on success or `SagaAbort` followed by
//! `CompensateStart`/`CompensateEnd` pairs in reverse append order.
//! Every transition is appended before it takes effect, which is what
//! makes the log a sufficient basis for crash recovery.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::config::{AbortLogPolicy, CoordinatorConfig};
use crate::context::{SagaContext, SagaId};
use crate::error::{Result, SagaError};
use crate::log::{EntryKind, LogEntry};
use crate::params::{ParamSet, SagaArgs};
use crate::storage::LogStore;
use crate::subtx::{InvokeOutcome, SubTxRegistry};

/// Runtime state of one saga instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaState {
    /// Forward execution in progress.
    Running,
    /// A failure was detected; compensations are replaying.
    Aborting,
    /// Compensation finished; the saga is rolled back.
    Aborted,
    /// The forward pass finished and the log was cleared.
    Completed,
}

/// What an abort actually compensated.
#[derive(Debug, Clone, Default)]
pub struct AbortReport {
    /// Sub-transaction ids compensated, in replay (reverse append) order.
    pub compensated: Vec<String>,
    /// Compensations that exhausted their retry budget.
    pub failures: Vec<CompensationFailure>,
}

impl AbortReport {
    /// True when every recorded action was compensated successfully.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One compensation that kept reporting business failures until its
/// retries ran out. The failure is recorded and the abort moves on; the
/// log keeps the dangling `CompensateStart` for manual follow-up.
#[derive(Debug, Clone)]
pub struct CompensationFailure {
    /// The sub-transaction whose compensation failed.
    pub sub_tx_id: String,
    /// Total invocation attempts, the initial call included.
    pub attempts: u32,
    /// The last business failure reported.
    pub reason: String,
}

/// One in-flight logical transaction driving one log stream.
///
/// Created by the coordinator. Not cloneable and not shareable: exactly
/// one instance writes a given stream, so methods take `&mut self` and
/// return the saga again for fluent chaining:
///
/// ```ignore
/// saga.exec_sub("deduce", (from, amount)).await?
///     .exec_sub("deposit", (to, amount)).await?
///     .end_saga().await?;
/// ```
///
/// A business failure inside an action aborts the saga and is absorbed;
/// once aborted, later `exec_sub` and `end_saga` calls are no-ops, so a
/// chain can run to its end unconditionally and the outcome is read from
/// [`state`](Self::state) and [`abort_report`](Self::abort_report).
pub struct Saga {
    id: SagaId,
    ctx: SagaContext,
    registry: Arc<SubTxRegistry>,
    config: CoordinatorConfig,
    store: Arc<dyn LogStore>,
    state: SagaState,
    next_seq: u64,
    abort_report: Option<AbortReport>,
}

impl Saga {
    pub(crate) fn new(
        id: SagaId,
        ctx: SagaContext,
        registry: Arc<SubTxRegistry>,
        config: CoordinatorConfig,
        store: Arc<dyn LogStore>,
    ) -> Self {
        Self {
            id,
            ctx,
            registry,
            config,
            store,
            state: SagaState::Running,
            next_seq: 0,
            abort_report: None,
        }
    }

    /// Rebuild a saga over an existing stream, continuing its sequence.
    pub(crate) fn resume(
        id: SagaId,
        ctx: SagaContext,
        registry: Arc<SubTxRegistry>,
        config: CoordinatorConfig,
        store: Arc<dyn LogStore>,
        last_sequence: u64,
    ) -> Self {
        Self {
            id,
            ctx,
            registry,
            config,
            store,
            state: SagaState::Running,
            next_seq: last_sequence + 1,
            abort_report: None,
        }
    }

    pub fn id(&self) -> &SagaId {
        &self.id
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    /// The context this saga passes to every action and compensation.
    pub fn context(&self) -> &SagaContext {
        &self.ctx
    }

    /// The log stream handle, for inspection.
    pub fn log(&self) -> Arc<dyn LogStore> {
        Arc::clone(&self.store)
    }

    /// Which compensations ran, if this saga aborted.
    pub fn abort_report(&self) -> Option<&AbortReport> {
        self.abort_report.as_ref()
    }

    /// Append one transition to the log.
    ///
    /// A failed append is fatal: the log is the durability boundary, and
    /// nothing that follows a lost write can be trusted.
    pub(crate) async fn record(&mut self, kind: EntryKind) -> Result<()> {
        let entry = LogEntry::new(self.next_seq, kind);
        self.store.append(entry.encode()?).await?;
        self.next_seq += 1;
        Ok(())
    }

    /// Execute a registered sub-transaction with the given arguments.
    ///
    /// Appends `ActionStart` with the encoded arguments, invokes the
    /// action, then appends `ActionEnd`. A business failure from the
    /// action triggers [`abort`](Self::abort) and is absorbed: the call
    /// still returns `Ok` and the saga is left `Aborted`. Hard errors
    /// (unknown id, unencodable arguments, storage failures) propagate;
    /// an unknown id fails before anything is logged or run.
    #[instrument(name = "saga.exec_sub", skip_all, fields(saga_id = %self.id, sub_tx = id))]
    pub async fn exec_sub<A: SagaArgs>(&mut self, id: &str, args: A) -> Result<&mut Self> {
        if self.state != SagaState::Running {
            debug!(state = ?self.state, "Saga not running, skipping sub-transaction");
            return Ok(self);
        }

        let def = match self.registry.get(id) {
            Some(def) => def.clone(),
            None => return Err(SagaError::UnknownSubTx(id.to_string())),
        };

        let params = args.encode()?;
        self.record(EntryKind::ActionStart {
            sub_tx_id: id.to_string(),
            params: params.clone(),
        })
        .await?;

        match def.action().invoke(self.ctx.clone(), &params).await? {
            InvokeOutcome::Completed => {
                self.record(EntryKind::ActionEnd {
                    sub_tx_id: id.to_string(),
                })
                .await?;
                debug!("Action completed");
            }
            InvokeOutcome::Failed(failure) => {
                warn!(reason = %failure, "Action failed, aborting saga");
                self.abort().await?;
            }
        }
        Ok(self)
    }

    /// Finish a successful saga: append `SagaEnd`, then clear the stream.
    ///
    /// A no-op unless the saga is still `Running`; an aborted saga keeps
    /// or clears its log according to
    /// [`AbortLogPolicy`](crate::config::AbortLogPolicy) instead.
    #[instrument(name = "saga.end", skip_all, fields(saga_id = %self.id))]
    pub async fn end_saga(&mut self) -> Result<()> {
        if self.state != SagaState::Running {
            debug!(state = ?self.state, "Saga not running, skipping end");
            return Ok(());
        }
        self.record(EntryKind::SagaEnd).await?;
        self.store.cleanup().await?;
        self.state = SagaState::Completed;
        info!("Saga completed");
        Ok(())
    }

    /// Roll the saga back: compensate every recorded `ActionStart` in
    /// reverse append order.
    ///
    /// Runs automatically when an action reports a business failure and
    /// can also be called directly. An action whose `ActionEnd` was never
    /// logged is still compensated: its side effects are uncertain, and
    /// compensations are required to be idempotent, so the possibly
    /// redundant call is harmless. Failing to read the log back is fatal,
    /// since compensation cannot proceed without history.
    #[instrument(name = "saga.abort", skip_all, fields(saga_id = %self.id))]
    pub async fn abort(&mut self) -> Result<()> {
        if self.state != SagaState::Running {
            debug!(state = ?self.state, "Saga not running, skipping abort");
            return Ok(());
        }
        let records = self.store.lookup().await?;
        let entries = records
            .iter()
            .map(|r| LogEntry::decode(r))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let pending = pending_compensations(&entries);
        self.run_compensation(pending, false).await
    }

    /// Compensation replay over pending `ActionStart` parameters, newest
    /// first. Appends `SagaAbort` unless the stream already carries one
    /// from an interrupted abort.
    pub(crate) async fn run_compensation(
        &mut self,
        pending: Vec<(String, ParamSet)>,
        abort_logged: bool,
    ) -> Result<()> {
        self.state = SagaState::Aborting;
        if !abort_logged {
            self.record(EntryKind::SagaAbort).await?;
        }
        info!(pending = pending.len(), "Compensation replay starting");

        let mut report = AbortReport::default();
        for (sub_tx_id, params) in &pending {
            self.compensate_one(sub_tx_id, params, &mut report).await?;
        }

        if self.config.abort_log == AbortLogPolicy::Clear {
            self.store.cleanup().await?;
        }
        self.state = SagaState::Aborted;
        if report.is_clean() {
            info!(compensated = report.compensated.len(), "Saga aborted, rollback complete");
        } else {
            warn!(
                compensated = report.compensated.len(),
                failed = report.failures.len(),
                "Saga aborted with unresolved compensations"
            );
        }
        self.abort_report = Some(report);
        Ok(())
    }

    /// Invoke one compensation with bounded retries.
    ///
    /// Business failures are retried per the configured policy and then
    /// escalated; the abort scan continues with the next entry either
    /// way. Hard errors still propagate.
    async fn compensate_one(
        &mut self,
        sub_tx_id: &str,
        params: &ParamSet,
        report: &mut AbortReport,
    ) -> Result<()> {
        let def = match self.registry.get(sub_tx_id) {
            Some(def) => def.clone(),
            None => return Err(SagaError::UnknownSubTx(sub_tx_id.to_string())),
        };
        self.record(EntryKind::CompensateStart {
            sub_tx_id: sub_tx_id.to_string(),
        })
        .await?;

        let retry = self.config.compensation_retry.clone();
        let mut attempt = 0u32;
        loop {
            match def.compensation().invoke(self.ctx.clone(), params).await? {
                InvokeOutcome::Completed => {
                    self.record(EntryKind::CompensateEnd {
                        sub_tx_id: sub_tx_id.to_string(),
                    })
                    .await?;
                    report.compensated.push(sub_tx_id.to_string());
                    debug!(sub_tx = sub_tx_id, "Compensation completed");
                    return Ok(());
                }
                InvokeOutcome::Failed(failure) if retry.should_retry(attempt) => {
                    warn!(
                        sub_tx = sub_tx_id,
                        attempt,
                        reason = %failure,
                        "Compensation failed, retrying"
                    );
                    tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                InvokeOutcome::Failed(failure) => {
                    error!(
                        sub_tx = sub_tx_id,
                        attempts = attempt + 1,
                        reason = %failure,
                        "ESCALATION: compensation exhausted its retries"
                    );
                    report.failures.push(CompensationFailure {
                        sub_tx_id: sub_tx_id.to_string(),
                        attempts: attempt + 1,
                        reason: failure.reason().to_string(),
                    });
                    return Ok(());
                }
            }
        }
    }
}

impl fmt::Debug for Saga {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Saga")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("next_seq", &self.next_seq)
            .finish_non_exhaustive()
    }
}

/// Scan a log snapshot for `ActionStart` entries not yet covered by a
/// `CompensateEnd`, newest first.
///
/// Matching is by occurrence, newest first, because compensation itself
/// proceeds newest first: when a sub-transaction id repeats, a recorded
/// `CompensateEnd` credits its most recent uncredited `ActionStart`.
/// `ActionEnd` plays no part here; an action that started is compensated
/// whether or not its completion made it into the log.
pub(crate) fn pending_compensations(entries: &[LogEntry]) -> Vec<(String, ParamSet)> {
    let mut credits: HashMap<&str, usize> = HashMap::new();
    let mut pending = Vec::new();
    for entry in entries.iter().rev() {
        match &entry.kind {
            EntryKind::CompensateEnd { sub_tx_id } => {
                *credits.entry(sub_tx_id).or_insert(0) += 1;
            }
            EntryKind::ActionStart { sub_tx_id, params } => match credits.get_mut(sub_tx_id.as_str()) {
                Some(credit) if *credit > 0 => *credit -= 1,
                _ => pending.push((sub_tx_id.clone(), params.clone())),
            },
            _ => {}
        }
    }
    pending
}

#[cfg(test)]
mod tests;
