//! Ambient context threaded through every action and compensation call.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

/// Identifier scoping one saga's log stream.
///
/// Callers key sagas by whatever they have at hand, so numeric and string
/// ids both convert losslessly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SagaId(String);

impl SagaId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for SagaId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for SagaId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SagaId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SagaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only context passed to every action and compensation.
///
/// Cheap to clone; the inner data is shared. Carries a correlation id for
/// log stitching and an optional bag of caller-supplied values. The
/// coordinator imposes no deadline of its own: cancellation and timeouts
/// belong to the embedding process, typically by carrying a deadline in
/// the value bag or wrapping the call in a timeout.
#[derive(Debug, Clone)]
pub struct SagaContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug, Clone)]
struct ContextInner {
    correlation_id: String,
    values: HashMap<String, Value>,
}

impl SagaContext {
    /// A fresh context with a random correlation id and no values.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                correlation_id: Uuid::new_v4().to_string(),
                values: HashMap::new(),
            }),
        }
    }

    /// Attach a named value, returning the updated context.
    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        Arc::make_mut(&mut self.inner).values.insert(key.into(), value);
        self
    }

    /// Look up a value attached with [`with_value`](Self::with_value).
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.inner.values.get(key)
    }

    /// Correlation id stamped on this context at creation.
    pub fn correlation_id(&self) -> &str {
        &self.inner.correlation_id
    }
}

impl Default for SagaContext {
    fn default() -> Self {
        Self::new()
    }
}
