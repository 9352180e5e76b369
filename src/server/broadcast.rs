use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use super::AppState;
use crate::logging;
use crate::shutdown::ShutdownSignal;
use crate::store::{self, StoreError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// The tick found live mode suspended and did nothing.
    pub skipped: bool,
    pub rows: usize,
    pub delivered: usize,
    pub dropped: usize,
}

/// One pass of the live feed: scan the recency window and push every row to
/// every registered connection. Connections whose push fails are
/// unregistered and skipped for the rest of the pass.
pub async fn broadcast_tick(state: &AppState) -> Result<BroadcastReport, StoreError> {
    if !state.mode.is_live() {
        return Ok(BroadcastReport {
            skipped: true,
            ..BroadcastReport::default()
        });
    }

    let config = &state.config;
    let since = state
        .clock
        .now_secs()
        .saturating_sub(config.recency_window_secs);
    let rows = store::bounded(
        config.store_timeout,
        state
            .store
            .scan_recent_across_symbols(since, config.max_rows),
    )
    .await?;

    let mut report = BroadcastReport {
        rows: rows.len(),
        ..BroadcastReport::default()
    };
    if rows.is_empty() {
        return Ok(report);
    }

    let mut targets = state.registry.snapshot();
    for record in &rows {
        let payload: Arc<str> = match serde_json::to_string(record) {
            Ok(payload) => payload.into(),
            Err(err) => {
                logging::warn(
                    "broadcast.serialize_error",
                    "Skipping tick that failed to serialize",
                    json!({ "symbol": record.symbol(), "error": err.to_string() }),
                );
                continue;
            }
        };

        targets.retain(|(id, connection)| {
            let outcome = if connection.is_alive() {
                connection.push(Arc::clone(&payload))
            } else {
                Err(super::registry::PushError::Closed)
            };
            match outcome {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(err) => {
                    report.dropped += 1;
                    state.registry.unregister(*id);
                    logging::info(
                        "registry.unregister",
                        "Dropping connection after failed push",
                        json!({ "connection": id, "reason": err.to_string() }),
                    );
                    false
                }
            }
        });
    }

    Ok(report)
}

pub async fn run_broadcast_loop(
    state: AppState,
    mut shutdown: watch::Receiver<ShutdownSignal>,
) -> Result<()> {
    logging::info(
        "broadcast.start",
        "Live broadcast loop started",
        json!({ "interval_ms": state.config.broadcast_interval.as_millis() as u64 }),
    );

    let mut ticker = interval(state.config.broadcast_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match broadcast_tick(&state).await {
                    Ok(report) => logging::debug(
                        "broadcast.tick",
                        "Broadcast tick finished",
                        json!({
                            "skipped": report.skipped,
                            "rows": report.rows,
                            "delivered": report.delivered,
                            "dropped": report.dropped,
                        }),
                    ),
                    Err(err) => logging::warn(
                        "broadcast.store_error",
                        "Recent scan failed, skipping tick",
                        json!({ "error": err.to_string() }),
                    ),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || shutdown.borrow().is_stopping() {
                    break;
                }
            }
        }
    }

    logging::info_simple("broadcast.stop", "Live broadcast loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::server::registry::testkit::RecordingConnection;
    use crate::server::ServerConfig;
    use crate::store::{MemoryStore, TickStore};
    use crate::tick::TickRecord;

    const NOW: i64 = 1_700_000_000;

    async fn state_with_rows(rows: &[(&str, f64, i64)]) -> AppState {
        let clock = Arc::new(ManualClock::new(NOW));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        for (symbol, price, timestamp) in rows {
            store
                .upsert(TickRecord::new(*symbol, *price, *timestamp).unwrap(), 3600)
                .await
                .unwrap();
        }
        AppState::new(ServerConfig::default(), store, clock)
    }

    #[tokio::test]
    async fn one_row_two_connections_two_identical_pushes() {
        let state = state_with_rows(&[("AAPL", 150.0, NOW)]).await;
        let first = Arc::new(RecordingConnection::default());
        let second = Arc::new(RecordingConnection::default());
        state.registry.register(first.clone());
        state.registry.register(second.clone());

        let report = broadcast_tick(&state).await.unwrap();
        assert_eq!(
            report,
            BroadcastReport { skipped: false, rows: 1, delivered: 2, dropped: 0 }
        );

        let expected = r#"{"symbol":"AAPL","price":150.0,"timestamp":1700000000}"#;
        assert_eq!(first.pushed(), vec![expected.to_string()]);
        assert_eq!(second.pushed(), first.pushed());
    }

    #[tokio::test]
    async fn failed_push_removes_connection_for_good() {
        let state = state_with_rows(&[("AAPL", 1.0, NOW), ("MSFT", 2.0, NOW)]).await;
        let healthy = Arc::new(RecordingConnection::default());
        let broken = Arc::new(RecordingConnection::failing());
        state.registry.register(healthy.clone());
        let broken_id = state.registry.register(broken);

        let report = broadcast_tick(&state).await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped, 1, "a dead connection is dropped once per pass");
        assert!(state
            .registry
            .snapshot()
            .iter()
            .all(|(id, _)| *id != broken_id));

        let again = broadcast_tick(&state).await.unwrap();
        assert_eq!(again.dropped, 0);
        assert_eq!(state.registry.len(), 1);
        assert_eq!(healthy.pushed().len(), 4);
    }

    #[tokio::test]
    async fn stale_rows_are_not_broadcast() {
        let state = state_with_rows(&[("AAPL", 1.0, NOW - 30)]).await;
        let viewer = Arc::new(RecordingConnection::default());
        state.registry.register(viewer.clone());

        let report = broadcast_tick(&state).await.unwrap();
        assert_eq!(report.rows, 0);
        assert!(viewer.pushed().is_empty());
    }

    #[tokio::test]
    async fn suspended_mode_skips_the_tick() {
        let state = state_with_rows(&[("AAPL", 1.0, NOW)]).await;
        let viewer = Arc::new(RecordingConnection::default());
        state.registry.register(viewer.clone());

        let guard = state.mode.suspend_live();
        let report = broadcast_tick(&state).await.unwrap();
        assert!(report.skipped);
        assert!(viewer.pushed().is_empty());
        drop(guard);

        assert_eq!(broadcast_tick(&state).await.unwrap().delivered, 1);
    }

    #[tokio::test]
    async fn extreme_recency_window_does_not_overflow() {
        let mut state = state_with_rows(&[("AAPL", 1.0, NOW)]).await;
        state.config = Arc::new(ServerConfig {
            recency_window_secs: i64::MAX,
            ..ServerConfig::default()
        });
        state.registry.register(Arc::new(RecordingConnection::default()));

        let report = broadcast_tick(&state).await.unwrap();
        assert_eq!(report.rows, 1);

        state.config = Arc::new(ServerConfig {
            recency_window_secs: i64::MIN,
            ..ServerConfig::default()
        });
        assert_eq!(broadcast_tick(&state).await.unwrap().rows, 0);
    }

    #[tokio::test]
    async fn registrations_survive_interleaved_ticks() {
        let state = state_with_rows(&[("AAPL", 1.0, NOW)]).await;
        for _ in 0..10 {
            state.registry.register(Arc::new(RecordingConnection::default()));
            broadcast_tick(&state).await.unwrap();
        }
        assert_eq!(state.registry.snapshot().len(), 10);
    }
}
