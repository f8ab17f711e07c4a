//! Sub-transaction definitions and their uniform invocation surface.
//!
//! A sub-transaction pairs a forward action with a reverse compensation.
//! Both sides are registered as plain async functions over one shared
//! argument tuple; a typed adapter decodes the logged parameter set and
//! calls through, so lookup and dispatch never inspect types at runtime.
//! Sharing the tuple type between the two functions pins their signatures
//! together at compile time, which is what makes replaying an action's
//! logged parameters into its compensation safe.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::SagaContext;
use crate::params::{ParamSet, SagaArgs};

/// Shorthand for the value actions and compensations return.
pub type BusinessResult = std::result::Result<(), BusinessFailure>;

/// A domain failure reported by an action or compensation.
///
/// Business failures are expected, planned-for conditions: an
/// insufficient balance, a rejected booking. They trigger compensation
/// rather than propagating as hard errors, so this type is not part of
/// [`crate::error::SagaError`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct BusinessFailure {
    reason: String,
}

impl BusinessFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<&str> for BusinessFailure {
    fn from(reason: &str) -> Self {
        Self::new(reason)
    }
}

impl From<String> for BusinessFailure {
    fn from(reason: String) -> Self {
        Self::new(reason)
    }
}

/// Outcome of one action or compensation invocation.
#[derive(Debug)]
pub enum InvokeOutcome {
    /// The call finished; its end transition can be logged.
    Completed,
    /// The call reported a business failure.
    Failed(BusinessFailure),
}

/// Uniform calling surface for one side of a sub-transaction.
///
/// Parameter decoding happens inside the implementation; a decode failure
/// is a fatal configuration error, never a business failure.
#[async_trait]
pub trait SubTxCall: Send + Sync {
    async fn invoke(&self, ctx: SagaContext, params: &ParamSet)
        -> crate::params::Result<InvokeOutcome>;
}

/// Adapter wrapping a typed async function into the uniform call surface.
struct FnCall<A, F> {
    f: F,
    _args: PhantomData<fn() -> A>,
}

impl<A, F> FnCall<A, F> {
    fn new(f: F) -> Self {
        Self {
            f,
            _args: PhantomData,
        }
    }
}

#[async_trait]
impl<A, F, Fut> SubTxCall for FnCall<A, F>
where
    A: SagaArgs,
    F: Fn(SagaContext, A) -> Fut + Send + Sync,
    Fut: Future<Output = BusinessResult> + Send,
{
    async fn invoke(
        &self,
        ctx: SagaContext,
        params: &ParamSet,
    ) -> crate::params::Result<InvokeOutcome> {
        let args = A::decode(params)?;
        Ok(match (self.f)(ctx, args).await {
            Ok(()) => InvokeOutcome::Completed,
            Err(failure) => InvokeOutcome::Failed(failure),
        })
    }
}

/// A registered sub-transaction: forward action plus reverse compensation.
///
/// Built once at coordinator construction and immutable afterwards, so
/// every saga the coordinator starts shares it read-only.
#[derive(Clone)]
pub struct SubTxDef {
    id: String,
    action: Arc<dyn SubTxCall>,
    compensation: Arc<dyn SubTxCall>,
}

impl SubTxDef {
    /// Pair an action with its compensation under one id.
    ///
    /// Both functions take the ambient context and the same argument
    /// tuple, so the parameter set logged for the action drives the
    /// compensation unchanged.
    pub fn new<A, FA, FutA, FC, FutC>(id: impl Into<String>, action: FA, compensation: FC) -> Self
    where
        A: SagaArgs + 'static,
        FA: Fn(SagaContext, A) -> FutA + Send + Sync + 'static,
        FutA: Future<Output = BusinessResult> + Send + 'static,
        FC: Fn(SagaContext, A) -> FutC + Send + Sync + 'static,
        FutC: Future<Output = BusinessResult> + Send + 'static,
    {
        Self {
            id: id.into(),
            action: Arc::new(FnCall::new(action)),
            compensation: Arc::new(FnCall::new(compensation)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn action(&self) -> &dyn SubTxCall {
        self.action.as_ref()
    }

    pub(crate) fn compensation(&self) -> &dyn SubTxCall {
        self.compensation.as_ref()
    }
}

impl fmt::Debug for SubTxDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubTxDef")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Immutable map of definitions shared by all sagas of one coordinator.
#[derive(Debug, Default)]
pub struct SubTxRegistry {
    defs: HashMap<String, SubTxDef>,
}

impl SubTxRegistry {
    pub(crate) fn from_defs(defs: HashMap<String, SubTxDef>) -> Self {
        Self { defs }
    }

    /// Look up a definition. `None` means the id was never registered,
    /// surfaced upstream as `SagaError::UnknownSubTx`.
    pub fn get(&self, id: &str) -> Option<&SubTxDef> {
        self.defs.get(id)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}
