//! Parameter round-trip between call arguments and the log.
//!
//! The arguments of every `exec_sub` call are encoded onto its
//! `ActionStart` entry and decoded back twice: once for the action call
//! itself and once more when an abort replays them to the compensation.
//! The encoding must therefore be reversible. Anything that fails to
//! encode, or fails to decode into the registered signature, is a fatal
//! configuration error rather than a silent truncation.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result type for parameter codec operations.
pub type Result<T> = std::result::Result<T, ParamError>;

/// Errors raised while encoding or decoding call parameters.
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    /// An argument refused to serialize into the logged form.
    #[error("argument {index} failed to encode: {source}")]
    Encode {
        index: usize,
        source: serde_json::Error,
    },

    /// A logged value did not deserialize into the registered type.
    #[error("argument {index} failed to decode: {source}")]
    Decode {
        index: usize,
        source: serde_json::Error,
    },

    /// The logged parameter count does not match the registered signature.
    #[error("expected {expected} arguments, log entry carries {found}")]
    Arity { expected: usize, found: usize },
}

/// Ordered, reversible representation of one call's arguments.
///
/// Stored verbatim on the `ActionStart` log entry and replayed unchanged
/// to the compensation during abort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSet(Vec<Value>);

impl ParamSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The encoded values in argument order.
    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

/// Argument tuples accepted by `exec_sub`.
///
/// Implemented for `()` and tuples of up to eight serde-round-trippable
/// values. The same tuple type drives both the action and the
/// compensation, so one logged [`ParamSet`] serves both directions.
pub trait SagaArgs: Send + Sized {
    /// Encode into the logged parameter form.
    fn encode(&self) -> Result<ParamSet>;

    /// Decode from the logged parameter form.
    fn decode(params: &ParamSet) -> Result<Self>;
}

impl SagaArgs for () {
    fn encode(&self) -> Result<ParamSet> {
        Ok(ParamSet::default())
    }

    fn decode(params: &ParamSet) -> Result<Self> {
        if !params.is_empty() {
            return Err(ParamError::Arity {
                expected: 0,
                found: params.len(),
            });
        }
        Ok(())
    }
}

macro_rules! impl_saga_args {
    ($($ty:ident : $idx:tt),+) => {
        impl<$($ty),+> SagaArgs for ($($ty,)+)
        where
            $($ty: Serialize + DeserializeOwned + Send,)+
        {
            fn encode(&self) -> Result<ParamSet> {
                Ok(ParamSet(vec![
                    $(serde_json::to_value(&self.$idx)
                        .map_err(|source| ParamError::Encode { index: $idx, source })?,)+
                ]))
            }

            fn decode(params: &ParamSet) -> Result<Self> {
                let expected = [$($idx),+].len();
                if params.len() != expected {
                    return Err(ParamError::Arity {
                        expected,
                        found: params.len(),
                    });
                }
                Ok((
                    $(serde_json::from_value(params.0[$idx].clone())
                        .map_err(|source| ParamError::Decode { index: $idx, source })?,)+
                ))
            }
        }
    };
}

impl_saga_args!(A:0);
impl_saga_args!(A:0, B:1);
impl_saga_args!(A:0, B:1, C:2);
impl_saga_args!(A:0, B:1, C:2, D:3);
impl_saga_args!(A:0, B:1, C:2, D:3, E:4);
impl_saga_args!(A:0, B:1, C:2, D:3, E:4, F:5);
impl_saga_args!(A:0, B:1, C:2, D:3, E:4, F:5, G:6);
impl_saga_args!(A:0, B:1, C:2, D:3, E:4, F:5, G:6, H:7);
