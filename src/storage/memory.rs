//! In-memory log storage.
//!
//! Keeps one saga's records in a vector behind an async lock. Suitable
//! for tests and local development; nothing survives the process.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{LogStore, Result, StoreError};

/// In-memory log stream with failure injection for tests.
#[derive(Default)]
pub struct MemoryLogStore {
    records: RwLock<Vec<String>>,
    closed: RwLock<bool>,
    fail_on_append: RwLock<bool>,
    fail_on_lookup: RwLock<bool>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent appends fail, simulating a lost backend.
    pub async fn set_fail_on_append(&self, fail: bool) {
        *self.fail_on_append.write().await = fail;
    }

    /// Make subsequent lookups fail.
    pub async fn set_fail_on_lookup(&self, fail: bool) {
        *self.fail_on_lookup.write().await = fail;
    }

    async fn ensure_open(&self) -> Result<()> {
        if *self.closed.read().await {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(&self, record: String) -> Result<()> {
        self.ensure_open().await?;
        if *self.fail_on_append.read().await {
            return Err(StoreError::Backend("append rejected".to_string()));
        }
        self.records.write().await.push(record);
        Ok(())
    }

    async fn lookup(&self) -> Result<Vec<String>> {
        self.ensure_open().await?;
        if *self.fail_on_lookup.read().await {
            return Err(StoreError::Backend("lookup rejected".to_string()));
        }
        Ok(self.records.read().await.clone())
    }

    async fn last(&self) -> Result<String> {
        self.ensure_open().await?;
        self.records
            .read()
            .await
            .last()
            .cloned()
            .ok_or(StoreError::Empty)
    }

    async fn cleanup(&self) -> Result<()> {
        self.ensure_open().await?;
        self.records.write().await.clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.closed.write().await = true;
        Ok(())
    }
}
