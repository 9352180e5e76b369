//! Query and write contract the server needs from the tick store.
//!
//! Rows are keyed by `(symbol, timestamp)` and expire `ttl_secs` after they
//! were written. Expiry is the store's job, callers never filter on it.

mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::tick::TickRecord;

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store call exceeded {0:?}")]
    Timeout(std::time::Duration),
}

#[async_trait]
pub trait TickStore: Send + Sync {
    /// Writes `record`, replacing any row with the same key.
    async fn upsert(&self, record: TickRecord, ttl_secs: u64) -> Result<(), StoreError>;

    /// Up to `limit` live rows with `timestamp > since`, in store order.
    async fn scan_recent_across_symbols(
        &self,
        since: i64,
        limit: usize,
    ) -> Result<Vec<TickRecord>, StoreError>;

    /// Live rows of `symbol` with `from <= timestamp <= to`, oldest first.
    async fn scan_range(
        &self,
        symbol: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<TickRecord>, StoreError>;
}

/// Bounds a store call by `limit`, mapping an elapsed deadline to
/// [`StoreError::Timeout`].
pub async fn bounded<T, F>(limit: std::time::Duration, call: F) -> Result<T, StoreError>
where
    F: std::future::Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}
