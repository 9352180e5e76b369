use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{StoreError, TickStore};
use crate::clock::{Clock, SystemClock};
use crate::tick::TickRecord;

#[derive(Debug, Clone)]
struct Row {
    record: TickRecord,
    expires_at: i64,
}

/// Ordered in-process store. Rows are clustered by `(symbol, timestamp)` and
/// hidden from every read once their expiry passes; `purge_expired` reclaims
/// the memory.
pub struct MemoryStore {
    rows: RwLock<BTreeMap<(String, i64), Row>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            clock,
        }
    }

    /// Drops expired rows and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now_secs();
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, row| row.expires_at > now);
        before - rows.len()
    }

    /// Rows held, including expired rows not yet purged.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl TickStore for MemoryStore {
    async fn upsert(&self, record: TickRecord, ttl_secs: u64) -> Result<(), StoreError> {
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let expires_at = self.clock.now_secs().saturating_add(ttl);
        let key = (record.symbol().to_owned(), record.timestamp());
        self.rows
            .write()
            .await
            .insert(key, Row { record, expires_at });
        Ok(())
    }

    async fn scan_recent_across_symbols(
        &self,
        since: i64,
        limit: usize,
    ) -> Result<Vec<TickRecord>, StoreError> {
        let now = self.clock.now_secs();
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .rev()
            .filter(|((_, timestamp), row)| *timestamp > since && row.expires_at > now)
            .take(limit)
            .map(|(_, row)| row.record.clone())
            .collect())
    }

    async fn scan_range(
        &self,
        symbol: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<TickRecord>, StoreError> {
        if from > to {
            return Ok(Vec::new());
        }
        let now = self.clock.now_secs();
        let rows = self.rows.read().await;
        Ok(rows
            .range((symbol.to_owned(), from)..=(symbol.to_owned(), to))
            .filter(|(_, row)| row.expires_at > now)
            .map(|(_, row)| row.record.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use proptest::prelude::*;

    fn tick(symbol: &str, price: f64, timestamp: i64) -> TickRecord {
        TickRecord::new(symbol, price, timestamp).unwrap()
    }

    fn store_at(now: i64) -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(now);
        (MemoryStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn range_scan_is_ascending_and_inclusive() {
        let (store, _) = store_at(100);
        for ts in [95, 90, 99, 92] {
            store.upsert(tick("AAPL", ts as f64, ts), 3600).await.unwrap();
        }
        store.upsert(tick("MSFT", 1.0, 95), 3600).await.unwrap();

        let rows = store.scan_range("AAPL", 90, 95).await.unwrap();
        let stamps: Vec<i64> = rows.iter().map(TickRecord::timestamp).collect();
        assert_eq!(stamps, vec![90, 92, 95]);
        assert!(rows.iter().all(|row| row.symbol() == "AAPL"));
    }

    #[tokio::test]
    async fn empty_range_is_not_an_error() {
        let (store, _) = store_at(100);
        assert!(store.scan_range("AAPL", 0, 10).await.unwrap().is_empty());
        assert!(store.scan_range("AAPL", 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn same_key_is_last_write_wins() {
        let (store, _) = store_at(100);
        store.upsert(tick("AAPL", 1.0, 50), 3600).await.unwrap();
        store.upsert(tick("AAPL", 2.0, 50), 3600).await.unwrap();

        let rows = store.scan_range("AAPL", 50, 50).await.unwrap();
        assert_eq!(rows, vec![tick("AAPL", 2.0, 50)]);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn expired_rows_are_invisible_then_purged() {
        let (store, clock) = store_at(1_000);
        store.upsert(tick("AAPL", 150.0, 1_000), 60).await.unwrap();
        store.upsert(tick("GOOGL", 130.0, 1_000), 600).await.unwrap();

        clock.advance(60);
        assert!(store.scan_range("AAPL", 0, 2_000).await.unwrap().is_empty());
        let recent = store.scan_recent_across_symbols(0, 10).await.unwrap();
        assert_eq!(recent, vec![tick("GOOGL", 130.0, 1_000)]);

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn overwrite_refreshes_expiry() {
        let (store, clock) = store_at(0);
        store.upsert(tick("AAPL", 1.0, 0), 10).await.unwrap();
        clock.advance(8);
        store.upsert(tick("AAPL", 1.5, 0), 10).await.unwrap();
        clock.advance(8);
        assert_eq!(
            store.scan_range("AAPL", 0, 0).await.unwrap(),
            vec![tick("AAPL", 1.5, 0)]
        );
    }

    #[tokio::test]
    async fn recent_scan_honours_bound_and_limit() {
        let (store, _) = store_at(100);
        for (symbol, ts) in [("AAPL", 97), ("AAPL", 99), ("MSFT", 98), ("FB", 100), ("FB", 90)] {
            store.upsert(tick(symbol, 10.0, ts), 3600).await.unwrap();
        }

        let recent = store.scan_recent_across_symbols(97, 10).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent.iter().all(|row| row.timestamp() > 97));

        let capped = store.scan_recent_across_symbols(0, 2).await.unwrap();
        assert_eq!(capped.len(), 2);
    }

    proptest! {
        #[test]
        fn upsert_then_range_returns_written_record(
            symbol in "[A-Z]{1,5}",
            price in 0.01f64..1.0e6,
            timestamp in 0i64..4_000_000_000,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let record = TickRecord::new(symbol.clone(), price, timestamp).unwrap();
            let rows = runtime.block_on(async {
                let (store, _) = store_at(timestamp);
                store.upsert(record.clone(), 3600).await.unwrap();
                store.scan_range(&symbol, timestamp, timestamp).await.unwrap()
            });
            prop_assert_eq!(rows, vec![record]);
        }
    }
}
