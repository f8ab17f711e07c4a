//! Sagarun - saga execution coordinator
//!
//! A Rust implementation of the Saga pattern's orchestration core: a
//! long-lived transaction is decomposed into ordered sub-transactions,
//! each pairing a forward action with a reverse compensation. Every state
//! transition is appended to a per-saga log before it takes effect, and
//! on failure the coordinator replays compensations in reverse append
//! order until the saga is rolled back.

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod log;
pub mod params;
pub mod saga;
pub mod storage;
pub mod subtx;
